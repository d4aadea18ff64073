//! Builders for gateway request payloads. Pure transformations from order
//! state plus site configuration; no I/O.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::GatewayConfig;
use crate::entities::{order, order_line, payment_instrument};
use crate::models::ledger::to_minor_units;

/// Payment product id for PayPal redirect payments.
pub const PRODUCT_PAYPAL: i64 = 840;
/// Payment product id for iDeal redirect payments.
pub const PRODUCT_IDEAL: i64 = 809;

const IDEAL_DEFAULT_ISSUER: &str = "INGBNL2A";
const REDIRECT_EXPIRATION_MINUTES: i64 = 10;

/// Card data captured at checkout. Never persisted; only flows into the
/// create-payment request (and is masked in any logging).
#[derive(Debug, Clone, Default)]
pub struct CardDetails {
    pub card_number: Option<String>,
    pub cvv: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreatePaymentOptions {
    /// Build for the hosted-checkout endpoint instead of a direct payment
    pub hosted: bool,
    /// Unattended order placed through the back-office API (MOTO channel)
    pub api_order: bool,
    pub client_ip: Option<String>,
    /// Wallet tokens offered to the hosted payment page
    pub stored_tokens: Vec<String>,
}

/// Address blob as the storefront stores it on the order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderAddress {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub phone: Option<String>,
}

impl OrderAddress {
    fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|text| serde_json::from_str(text).ok())
            .unwrap_or_default()
    }
}

fn address_payload(addr: &OrderAddress, include_name: bool) -> Value {
    if addr.address1.is_none() {
        return json!({});
    }
    let mut payload = json!({
        "additionalInfo": addr.address2.clone().unwrap_or_default(),
        "city": addr.city,
        "countryCode": addr.country_code.as_deref().map(str::to_uppercase),
        "state": addr.state,
        "street": addr.address1,
        "zip": addr.postal_code,
    });
    if include_name {
        payload["name"] = json!({
            "firstName": addr.first_name,
            "surname": addr.last_name,
            "title": addr.title,
        });
    }
    payload
}

/// Customer number for registered shoppers, order-derived reference for
/// guests.
fn merchant_customer_no(order: &order::Model) -> String {
    order
        .customer_no
        .clone()
        .unwrap_or_else(|| format!("GUEST#{}", order.order_number))
}

/// Order locale with the configured fallback for unattended/API-originated
/// orders that carry none (or the platform's "default" sentinel).
fn customer_locale<'a>(order: &'a order::Model, config: &'a GatewayConfig) -> &'a str {
    match order.customer_locale.as_deref() {
        Some("default") | Some("") | None => &config.default_locale,
        Some(locale) => locale,
    }
}

/// `MMYY` as the gateway expects card expiry dates.
fn format_expiry(month: i32, year: i32) -> String {
    format!("{:02}{:02}", month, year % 100)
}

fn card_block(
    instrument: &payment_instrument::Model,
    card: &CardDetails,
    config: &GatewayConfig,
) -> Value {
    let Some(expiry_month) = instrument.card_expiry_month else {
        // Instrument without card data: only the settlement flags apply.
        return json!({
            "requiresApproval": config.requires_approval,
            "skipAuthentication": config.skip_authentication,
        });
    };
    let expiry_year = instrument.card_expiry_year.unwrap_or_default();
    let has_token = card.token.is_some();

    json!({
        "card": {
            // a supplied token replaces the PAN entirely
            "cardNumber": if has_token { "" } else { card.card_number.as_deref().unwrap_or("") },
            "cardholderName": instrument.card_holder,
            "cvv": card.cvv,
            "expiryDate": format_expiry(expiry_month, expiry_year),
        },
        "paymentProductId": instrument.card_product_id,
        "requiresApproval": config.requires_approval,
        "returnUrl": config.return_url,
        "skipAuthentication": config.skip_authentication,
        "skipFraudService": false,
        "token": card.token,
        "tokenize": !has_token,
        "transactionChannel": "ECOMMERCE",
    })
}

fn redirect_block(product_id: i64, config: &GatewayConfig) -> Value {
    let mut block = json!({
        "expirationPeriod": REDIRECT_EXPIRATION_MINUTES,
        "isRecurring": false,
        "paymentProductId": product_id,
        "requiresApproval": config.requires_approval,
        "token": "",
    });
    if product_id == PRODUCT_IDEAL {
        block["paymentProduct809SpecificInput"] = json!({ "issuerId": IDEAL_DEFAULT_ISSUER });
    }
    block
}

fn hosted_checkout_block(
    order: &order::Model,
    config: &GatewayConfig,
    stored_tokens: &[String],
) -> Value {
    json!({
        "locale": customer_locale(order, config),
        "returnUrl": config.return_url,
        "showResultPage": false,
        "returnCancelState": true,
        "tokens": stored_tokens.join(","),
    })
}

/// Line items with every amount minor-unit-encoded per line. Rounding is
/// computed per line, never derived from the order total, so a long cart
/// cannot accumulate cross-line drift.
fn order_items_payload(lines: &[order_line::Model], currency: &str) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|line| {
            let discounted_unit = line.discounted_unit_price();
            let base_minor = to_minor_units(line.base_unit_price);
            let discounted_minor = to_minor_units(discounted_unit);
            json!({
                "amountOfMoney": {
                    "amount": to_minor_units(line.line_total),
                    "currencyCode": currency,
                },
                "invoiceData": {
                    "description": line.description,
                    "merchantLinenumber": line.position,
                    "nrOfItems": line.quantity.to_string(),
                    "pricePerItem": discounted_minor,
                },
                "orderLineDetails": {
                    "discountAmount": base_minor - discounted_minor,
                    "lineAmountTotal": to_minor_units(line.line_total),
                    "productCode": line.product_code.chars().take(12).collect::<String>(),
                    "productPrice": base_minor,
                    "quantity": line.quantity.to_string(),
                    "taxAmount": to_minor_units(line.tax_amount),
                }
            })
        })
        .collect();
    Value::Array(items)
}

/// Builds the create-payment request (direct card, redirect or hosted).
pub fn build_create_payment(
    order: &order::Model,
    lines: &[order_line::Model],
    instrument: &payment_instrument::Model,
    card: &CardDetails,
    config: &GatewayConfig,
    opts: &CreatePaymentOptions,
) -> Value {
    let billing = OrderAddress::parse(order.billing_address.as_deref());
    let shipping = OrderAddress::parse(order.shipping_address.as_deref());

    let mut payload = json!({
        "fraudFields": {
            "customerIpAddress": opts.client_ip,
        },
        "order": {
            "amountOfMoney": {
                "amount": to_minor_units(order.total_amount),
                "currencyCode": order.currency,
            },
            "customer": {
                "billingAddress": address_payload(&billing, false),
                "contactDetails": {
                    "emailAddress": order.customer_email,
                    "emailMessageType": "html",
                    "phoneNumber": billing.phone,
                },
                "locale": customer_locale(order, config),
                "merchantCustomerId": merchant_customer_no(order),
                "personalInformation": {
                    "name": {
                        "firstName": billing.first_name,
                        "surname": billing.last_name,
                        "title": billing.title,
                    }
                },
                "shippingAddress": address_payload(&shipping, true),
            },
            "references": {
                "descriptor": config.soft_descriptor.clone().unwrap_or_default(),
                "merchantReference": order.order_number,
            },
            "shoppingCart": {
                "amountBreakdown": [
                    { "amount": to_minor_units(order.shipping_total), "type": "SHIPPING" },
                    { "amount": to_minor_units(order.tax_total), "type": "VAT" },
                ],
                "items": order_items_payload(lines, &order.currency),
            }
        }
    });

    match instrument.payment_method.as_str() {
        payment_instrument::methods::PAYPAL => {
            payload["redirectPaymentMethodSpecificInput"] = redirect_block(PRODUCT_PAYPAL, config);
        }
        payment_instrument::methods::IDEAL => {
            payload["redirectPaymentMethodSpecificInput"] = redirect_block(PRODUCT_IDEAL, config);
        }
        _ => {
            // direct card and hosted-card flows carry the card block
            payload["cardPaymentMethodSpecificInput"] = card_block(instrument, card, config);
        }
    }

    if opts.hosted {
        payload["hostedCheckoutSpecificInput"] =
            hosted_checkout_block(order, config, &opts.stored_tokens);
        // the hosted page collects card data itself
        if payload.get("redirectPaymentMethodSpecificInput").is_some() {
            if let Some(obj) = payload.as_object_mut() {
                obj.remove("cardPaymentMethodSpecificInput");
            }
        }
    }

    if opts.api_order {
        if let Some(card_input) = payload.get_mut("cardPaymentMethodSpecificInput") {
            card_input["skipAuthentication"] = json!(true);
            card_input["transactionChannel"] = json!("MOTO");
        }
    }

    payload
}

/// Approve-payment request for a transaction awaiting merchant approval.
pub fn build_approve_payment(order: &order::Model, amount: Decimal) -> Value {
    json!({
        "amount": to_minor_units(amount),
        "order": {
            "references": {
                "merchantReference": order.order_number,
            }
        }
    })
}

/// Refund request for a captured payment.
pub fn build_refund(order: &order::Model, amount: Decimal, refund_date: DateTime<Utc>) -> Value {
    let billing = OrderAddress::parse(order.billing_address.as_deref());
    json!({
        "amountOfMoney": {
            "amount": to_minor_units(amount),
            "currencyCode": order.currency,
        },
        "customer": {
            "address": address_payload(&billing, false),
            "contactDetails": {
                "emailAddress": order.customer_email,
                "emailMessageType": "html",
            },
        },
        "refundDate": refund_date.format("%Y%m%d").to_string(),
        "refundReference": {
            "merchantReference": format!("{}R", order.order_number),
        }
    })
}

/// Standalone tokenization request for a stored card.
pub fn build_token(order: &order::Model, instrument: &payment_instrument::Model) -> Value {
    let Some(expiry_month) = instrument.card_expiry_month else {
        return json!({});
    };
    let billing = OrderAddress::parse(order.billing_address.as_deref());
    json!({
        "card": {
            "alias": "",
            "customer": {
                "billingAddress": address_payload(&billing, false),
                "merchantCustomerId": merchant_customer_no(order),
                "personalInformation": {
                    "name": {
                        "firstName": billing.first_name,
                        "surname": billing.last_name,
                        "title": billing.title,
                    }
                },
            },
            "data": {
                "cardWithoutCvv": {
                    "cardNumber": instrument.card_number_masked,
                    "cardholderName": instrument.card_holder,
                    "expiryDate": format_expiry(
                        expiry_month,
                        instrument.card_expiry_year.unwrap_or_default()
                    ),
                },
            }
        },
        "paymentProductId": instrument.card_product_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn test_order(locale: Option<&str>) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-1001".to_string(),
            customer_id: None,
            customer_no: None,
            customer_email: "shopper@example.com".to_string(),
            customer_locale: locale.map(str::to_string),
            status: "created".to_string(),
            export_status: "not_exported".to_string(),
            payment_status: "not_paid".to_string(),
            gateway_status: None,
            currency: "EUR".to_string(),
            total_amount: dec!(54.97),
            shipping_total: dec!(4.99),
            tax_total: dec!(9.16),
            billing_address: Some(
                r#"{"first_name":"Ada","last_name":"Byron","address1":"1 King St","city":"London","postal_code":"EC1","country_code":"gb","phone":"+44 20 1234"}"#
                    .to_string(),
            ),
            shipping_address: None,
            payment_ledger: None,
            refund_ids: None,
            transaction_log: None,
            notes: None,
            placed_at: None,
            created_at: Utc::now(),
            updated_at: None,
            version: 1,
        }
    }

    fn card_instrument(method: &str) -> payment_instrument::Model {
        payment_instrument::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            processor: payment_instrument::PROCESSOR_CARD.to_string(),
            payment_method: method.to_string(),
            transaction_id: None,
            processor_reference: None,
            hosted_checkout_id: None,
            amount: Some(dec!(54.97)),
            currency: Some("EUR".to_string()),
            card_holder: Some("Ada Byron".to_string()),
            card_number_masked: Some("456735******7977".to_string()),
            card_expiry_month: Some(3),
            card_expiry_year: Some(2029),
            card_product_id: Some(1),
            card_token: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn line(position: i32, qty: i32, base: Decimal, total: Decimal, tax: Decimal) -> order_line::Model {
        order_line::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            position,
            product_code: format!("SKU-{position}-LONGCODE"),
            description: format!("Item {position}"),
            quantity: qty,
            base_unit_price: base,
            line_total: total,
            tax_amount: tax,
        }
    }

    #[test]
    fn amounts_are_integer_minor_units() {
        let order = test_order(Some("en_US"));
        let lines = vec![line(1, 3, dec!(10.00), dec!(24.99), dec!(4.17))];
        let payload = build_create_payment(
            &order,
            &lines,
            &card_instrument(payment_instrument::methods::CREDIT_CARD),
            &CardDetails {
                card_number: Some("4567350000427977".to_string()),
                cvv: Some("123".to_string()),
                token: None,
            },
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions::default(),
        );

        assert_eq!(payload["order"]["amountOfMoney"]["amount"], 5497);
        assert_eq!(payload["order"]["amountOfMoney"]["currencyCode"], "EUR");
        assert_eq!(
            payload["order"]["shoppingCart"]["amountBreakdown"][0]["amount"],
            499
        );
        let item = &payload["order"]["shoppingCart"]["items"][0];
        assert_eq!(item["orderLineDetails"]["lineAmountTotal"], 2499);
        assert_eq!(item["orderLineDetails"]["productPrice"], 1000);
        assert_eq!(item["orderLineDetails"]["taxAmount"], 417);
        // 24.99 / 3 = 8.33; discount = 10.00 - 8.33 per unit in minor units
        assert_eq!(item["invoiceData"]["pricePerItem"], 833);
        assert_eq!(item["orderLineDetails"]["discountAmount"], 167);
        // product code truncated to 12 chars
        assert_eq!(
            item["orderLineDetails"]["productCode"].as_str().unwrap().len(),
            12
        );
    }

    #[test]
    fn per_line_rounding_is_independent() {
        let order = test_order(None);
        // three lines at 0.335 each would drift if derived from the total
        let lines = vec![
            line(1, 1, dec!(0.335), dec!(0.335), dec!(0.00)),
            line(2, 1, dec!(0.335), dec!(0.335), dec!(0.00)),
            line(3, 1, dec!(0.335), dec!(0.335), dec!(0.00)),
        ];
        let payload = build_create_payment(
            &order,
            &lines,
            &card_instrument(payment_instrument::methods::CREDIT_CARD),
            &CardDetails::default(),
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions::default(),
        );
        for item in payload["order"]["shoppingCart"]["items"].as_array().unwrap() {
            assert_eq!(item["orderLineDetails"]["lineAmountTotal"], 34);
        }
    }

    #[test]
    fn token_suppresses_pan_and_tokenize() {
        let order = test_order(Some("en_US"));
        let payload = build_create_payment(
            &order,
            &[],
            &card_instrument(payment_instrument::methods::CREDIT_CARD),
            &CardDetails {
                card_number: Some("4567350000427977".to_string()),
                cvv: Some("123".to_string()),
                token: Some("tok_abc".to_string()),
            },
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions::default(),
        );
        let card = &payload["cardPaymentMethodSpecificInput"];
        assert_eq!(card["card"]["cardNumber"], "");
        assert_eq!(card["token"], "tok_abc");
        assert_eq!(card["tokenize"], false);
        assert_eq!(card["card"]["expiryDate"], "0329");
    }

    #[test]
    fn fresh_card_requests_tokenization() {
        let order = test_order(Some("en_US"));
        let payload = build_create_payment(
            &order,
            &[],
            &card_instrument(payment_instrument::methods::CREDIT_CARD),
            &CardDetails {
                card_number: Some("4567350000427977".to_string()),
                cvv: Some("123".to_string()),
                token: None,
            },
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions::default(),
        );
        assert_eq!(payload["cardPaymentMethodSpecificInput"]["tokenize"], true);
    }

    #[test]
    fn redirect_methods_replace_card_block() {
        let order = test_order(Some("en_US"));
        let payload = build_create_payment(
            &order,
            &[],
            &card_instrument(payment_instrument::methods::PAYPAL),
            &CardDetails::default(),
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions { hosted: true, ..Default::default() },
        );
        assert!(payload.get("cardPaymentMethodSpecificInput").is_none());
        assert_eq!(
            payload["redirectPaymentMethodSpecificInput"]["paymentProductId"],
            PRODUCT_PAYPAL
        );
        assert!(payload.get("hostedCheckoutSpecificInput").is_some());

        let ideal = build_create_payment(
            &order,
            &[],
            &card_instrument(payment_instrument::methods::IDEAL),
            &CardDetails::default(),
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions::default(),
        );
        assert_eq!(
            ideal["redirectPaymentMethodSpecificInput"]["paymentProduct809SpecificInput"]
                ["issuerId"],
            IDEAL_DEFAULT_ISSUER
        );
    }

    #[test]
    fn locale_falls_back_for_unattended_orders() {
        let cfg = GatewayConfig::sandbox("M1");
        assert_eq!(customer_locale(&test_order(None), &cfg), "en_GB");
        assert_eq!(customer_locale(&test_order(Some("default")), &cfg), "en_GB");
        assert_eq!(customer_locale(&test_order(Some("nl_NL")), &cfg), "nl_NL");
    }

    #[test]
    fn api_orders_use_moto_channel() {
        let order = test_order(None);
        let payload = build_create_payment(
            &order,
            &[],
            &card_instrument(payment_instrument::methods::CREDIT_CARD),
            &CardDetails::default(),
            &GatewayConfig::sandbox("M1"),
            &CreatePaymentOptions { api_order: true, ..Default::default() },
        );
        let card = &payload["cardPaymentMethodSpecificInput"];
        assert_eq!(card["transactionChannel"], "MOTO");
        assert_eq!(card["skipAuthentication"], true);
    }

    #[test]
    fn guest_orders_get_guest_customer_reference() {
        let order = test_order(None);
        assert_eq!(merchant_customer_no(&order), "GUEST#ORD-1001");
    }

    #[test]
    fn token_payload_uses_stored_card_data() {
        let order = test_order(None);
        let instrument = card_instrument(payment_instrument::methods::CREDIT_CARD);
        let payload = build_token(&order, &instrument);
        assert_eq!(payload["paymentProductId"], 1);
        assert_eq!(payload["card"]["data"]["cardWithoutCvv"]["expiryDate"], "0329");
        assert_eq!(payload["card"]["customer"]["merchantCustomerId"], "GUEST#ORD-1001");

        let mut bare = card_instrument(payment_instrument::methods::CREDIT_CARD);
        bare.card_expiry_month = None;
        assert_eq!(build_token(&order, &bare), serde_json::json!({}));
    }

    #[test]
    fn refund_payload_carries_dated_reference() {
        let order = test_order(None);
        let when = chrono::DateTime::parse_from_rfc3339("2026-03-14T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = build_refund(&order, dec!(12.34), when);
        assert_eq!(payload["amountOfMoney"]["amount"], 1234);
        assert_eq!(payload["refundDate"], "20260314");
        assert_eq!(payload["refundReference"]["merchantReference"], "ORD-1001R");
    }
}
