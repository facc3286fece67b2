use crate::error::PulseError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// Wrappers stack: the table store wants the anon key both as `apikey` and as
/// a bearer token, which is two `ApiKey` layers (see [`supabase`]).
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, PulseError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| PulseError::Config(format!("invalid header name '{header_name}': {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| PulseError::Config(format!("invalid value for header '{header_name}': {e}")))?;
        value.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// Uses `Authorization: Bearer <key>`.
    pub fn bearer(inner: C, key: &str) -> Result<Self, PulseError> {
        Self::new(inner, "Authorization", &format!("Bearer {key}"))
    }
}

/// Wraps `inner` with the `apikey` header and a matching bearer token.
pub fn supabase<C>(inner: C, anon_key: &str) -> Result<ApiKey<ApiKey<C>>, PulseError> {
    ApiKey::bearer(ApiKey::new(inner, "apikey", anon_key)?, anon_key)
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}
