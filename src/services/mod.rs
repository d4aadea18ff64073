pub mod notifications;
pub mod order_actions;
pub mod reconciler;
pub mod verification;
pub mod wallet;
