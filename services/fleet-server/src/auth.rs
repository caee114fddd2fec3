//! Node key authentication as an axum extractor.

use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use osfleet_core::{FleetError, Host};

use crate::error::ApiError;
use crate::state::AppState;
use crate::wire::HasNodeKey;

/// A decoded request body together with the host its node key belongs to.
#[derive(Debug)]
pub struct Authenticated<T> {
    pub host: Host,
    pub body: T,
}

#[async_trait]
impl<T> FromRequest<Arc<AppState>> for Authenticated<T>
where
    T: DeserializeOwned + HasNodeKey + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| FleetError::InvalidInput(rejection.body_text()))?;

        let host = state.host_auth.authenticate_host(body.node_key())?;
        Ok(Self { host, body })
    }
}
