//! Payment gateway connector for an order-management platform: builds
//! gateway requests from orders, applies asynchronous status notifications
//! to order records exactly once, orchestrates admin payment actions, and
//! dispatches status emails.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;

use crate::events::EventSender;
use crate::gateway::client::GatewayClient;
use crate::services::notifications::{EmailSender, NotificationDispatcher};
use crate::services::order_actions::OrderActionService;
use crate::services::reconciler::StatusReconciler;
use crate::services::verification::VerificationTokenService;
use crate::services::wallet::WalletService;

/// Service instances shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub reconciler: Arc<StatusReconciler>,
    pub order_actions: Arc<OrderActionService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub wallet: Arc<WalletService>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    /// Wires the full service graph from a database connection, an email
    /// transport and an event channel.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        email_sender: Arc<dyn EmailSender>,
        event_sender: EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            config.notifications.clone(),
            email_sender,
        ));
        let reconciler = Arc::new(StatusReconciler::new(
            db.clone(),
            dispatcher.clone(),
            Some(event_sender.clone()),
            config.gateway.enable_transaction_log,
        ));
        let gateway_client = Arc::new(GatewayClient::new(config.gateway.clone())?);
        let wallet = Arc::new(WalletService::new(db.clone()));
        let verification = Arc::new(VerificationTokenService::new(
            config.gateway.verification_secret.clone(),
        ));
        let order_actions = Arc::new(OrderActionService::new(
            db.clone(),
            gateway_client,
            reconciler.clone(),
            wallet.clone(),
            verification,
            config.gateway.clone(),
        ));

        Ok(Self {
            db,
            config,
            event_sender,
            services: AppServices {
                reconciler,
                order_actions,
                dispatcher,
                wallet,
            },
        })
    }
}

/// The application router with shared middleware applied.
pub fn app_router(state: AppState) -> Router {
    handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
