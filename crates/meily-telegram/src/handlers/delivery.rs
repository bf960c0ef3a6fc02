//! Address form submitted from the delivery mini-app via `Telegram.WebApp.sendData`.

use serde::Deserialize;

use meily_core::{conversation::DeliveryForm, domain::UserId, errors::Error, Result};

#[derive(Debug, Deserialize)]
struct FormPayload {
    full_name: String,
    contact: String,
    address: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

pub fn delivery_form(user_id: UserId, data: &str) -> Result<DeliveryForm> {
    let p: FormPayload = serde_json::from_str(data)
        .map_err(|e| Error::Validation(format!("malformed delivery form: {e}")))?;
    Ok(DeliveryForm {
        user_id,
        full_name: p.full_name,
        contact: p.contact,
        address: p.address,
        latitude: p.latitude,
        longitude: p.longitude,
    })
}
