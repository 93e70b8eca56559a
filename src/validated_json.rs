//! JSON request bodies that are checked before a handler sees them.
//!
//! Malformed JSON, unknown fields and values that break a `#[validate]` rule all become an
//! [EnergyVizError] and are answered with a 400 and the usual error body.

use crate::error::EnergyVizError;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Json},
    http::Request,
};
use serde::de::DeserializeOwned;
use validator::Validate;

/// Request body of type `T`, deserialised from JSON and then validated.
#[derive(Clone, Debug)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    B: Send + 'static,
{
    type Rejection = EnergyVizError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await?;
        if let Err(errors) = body.validate() {
            tracing::debug!(%errors, "rejected request body");
            return Err(errors.into());
        }
        Ok(Self(body))
    }
}
