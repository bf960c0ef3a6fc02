use chrono::Utc;
use tracing::{info, warn};

use super::ConversationMachine;
use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    messaging::types::{Content, OutgoingMessage},
    records::DeliveryRecord,
    texts, Result,
};

/// Fallback point (Almaty) for forms submitted without usable coordinates.
const DEFAULT_LATITUDE: f64 = 43.238949;
const DEFAULT_LONGITUDE: f64 = 76.889709;

/// Delivery details submitted through the external address form.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryForm {
    pub user_id: UserId,
    pub full_name: String,
    pub contact: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn resolve_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> (f64, f64) {
    match (latitude, longitude) {
        (Some(lat), Some(lon))
            if lat.is_finite()
                && lon.is_finite()
                && (-90.0..=90.0).contains(&lat)
                && (-180.0..=180.0).contains(&lon) =>
        {
            (lat, lon)
        }
        _ => (DEFAULT_LATITUDE, DEFAULT_LONGITUDE),
    }
}

impl ConversationMachine {
    /// Finish a purchase once the buyer has submitted the address form.
    ///
    /// Only existing clients may submit. On success the conversation is reset to `Start`;
    /// on failure the buyer is told to resubmit and the error is returned.
    pub async fn complete_delivery(&self, form: DeliveryForm) -> Result<()> {
        let user = form.user_id;
        match self.save_delivery_form(form).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reject_delivery(user, &e).await;
                Err(e)
            }
        }
    }

    /// Tell the buyer their form was not accepted. Bad input asks for a resubmission;
    /// anything else is reported as a technical error.
    pub async fn reject_delivery(&self, user: UserId, error: &Error) {
        warn!(user_id = user.0, error = %error, "delivery form rejected");
        let text = match error {
            Error::Validation(_) => texts::DELIVERY_REJECTED,
            _ => texts::TECHNICAL_ERROR,
        };
        self.reply(ChatId::from(user), OutgoingMessage::text(text))
            .await;
    }

    async fn save_delivery_form(&self, form: DeliveryForm) -> Result<()> {
        let full_name = form.full_name.trim();
        let contact = form.contact.trim();
        let address = form.address.trim();
        if full_name.is_empty() || contact.is_empty() || address.is_empty() {
            return Err(Error::Validation(
                "full name, contact and address are required".to_string(),
            ));
        }

        let user = form.user_id;
        if self.records.is_client_unique(user).await? {
            return Err(Error::Validation(format!("user {} is not a client", user.0)));
        }

        let (latitude, longitude) = resolve_coordinates(form.latitude, form.longitude);
        self.records
            .save_delivery(&DeliveryRecord {
                user_id: user,
                full_name: full_name.to_string(),
                contact: contact.to_string(),
                address: address.to_string(),
                latitude,
                longitude,
                submitted_at: Utc::now(),
            })
            .await?;
        info!(user_id = user.0, latitude, longitude, "delivery address saved");

        let chat = ChatId::from(user);
        self.reply(
            chat,
            OutgoingMessage::new(Content::Location {
                latitude,
                longitude,
            }),
        )
        .await;
        self.reply(
            chat,
            texts::delivery_confirmation(full_name, contact, address),
        )
        .await;

        if let Err(e) = self.states.delete(user).await {
            warn!(user_id = user.0, error = %e, "failed to reset state after delivery");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_fall_back_when_missing_or_out_of_range() {
        assert_eq!(resolve_coordinates(Some(51.1), Some(71.4)), (51.1, 71.4));
        assert_eq!(
            resolve_coordinates(None, Some(71.4)),
            (DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
        );
        assert_eq!(
            resolve_coordinates(Some(123.0), Some(71.4)),
            (DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
        );
        assert_eq!(
            resolve_coordinates(Some(f64::NAN), Some(0.0)),
            (DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
        );
    }
}
