//! [`Fetch`] implementation backed by [`reqwest`].

use async_trait::async_trait;
use reqwest::multipart;
use tunnel_core::abort::race;
use tunnel_core::body::drain_stream;
use tunnel_core::{
    Body, CachePolicy, Fetch, FormData, FormValue, Headers, HttpRequest, HttpResponse, RedirectPolicy, Result,
    TunnelError,
};
use url::Url;

/// Performs real HTTP requests.
///
/// Holds two clients because reqwest fixes the redirect policy per client:
/// one follows redirects, the other hands 3xx responses back unchanged for
/// the `manual` and `error` modes.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    following: reqwest::Client,
    manual: reqwest::Client,
}

impl ReqwestFetch {
    /// Builds both clients, logging and falling back to reqwest's defaults if
    /// the builder fails. Use [`ReqwestFetch::try_new`] to handle the error.
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(fetch) => fetch,
            Err(err) => {
                tracing::error!(error = %err, "failed to build HTTP clients; falling back to reqwest defaults");
                Self::from_clients(reqwest::Client::new(), reqwest::Client::new())
            }
        }
    }

    pub fn try_new() -> Result<Self> {
        let following = reqwest::Client::builder()
            .build()
            .map_err(|e| TunnelError::Network(format!("failed to build HTTP client: {e}")))?;
        let manual = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TunnelError::Network(format!("failed to build non-redirecting HTTP client: {e}")))?;
        Ok(Self { following, manual })
    }

    /// Uses existing clients. `manual` should not follow redirects.
    pub fn from_clients(following: reqwest::Client, manual: reqwest::Client) -> Self {
        Self { following, manual }
    }
}

impl Default for ReqwestFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            mut headers,
            body,
            redirect,
            cache,
            signal,
            ..
        } = request;

        let verb = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| TunnelError::Network(format!("invalid method `{method}`: {e}")))?;
        let requested = Url::parse(&url).map_err(|e| TunnelError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        apply_cache_policy(&mut headers, cache);

        let client = match redirect {
            RedirectPolicy::Follow => &self.following,
            RedirectPolicy::Manual | RedirectPolicy::Error => &self.manual,
        };
        let mut builder = client.request(verb, requested.clone());
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match body {
            None => builder,
            Some(Body::Text(text)) => builder.body(text),
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::UrlEncoded(params)) => builder.body(params.to_string()),
            Some(Body::Form(form)) => builder.multipart(to_multipart(&form)?),
            Some(Body::Bytes(bytes)) => builder.body(bytes),
            Some(Body::Blob(blob)) => builder.body(blob.bytes),
            Some(Body::Stream(stream)) => builder.body(drain_stream(stream).await?),
        };

        let response = race(signal.as_ref(), async move {
            builder.send().await.map_err(map_reqwest_error)
        })
        .await?;

        let status = response.status();
        if redirect == RedirectPolicy::Error && status.is_redirection() {
            return Err(TunnelError::Network(format!(
                "{url} answered {status} but redirect mode is `error`"
            )));
        }
        let final_url = response.url().clone();
        let mut response_headers = Headers::new();
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(value) => response_headers.append(name.as_str(), value),
                Err(_) => tracing::debug!(header = %name, "dropping non-UTF-8 response header"),
            }
        }

        let bytes = race(signal.as_ref(), async move {
            response.bytes().await.map_err(map_reqwest_error)
        })
        .await?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: response_headers,
            redirected: final_url != requested,
            url: final_url.to_string(),
            body: (!bytes.is_empty()).then(|| Body::Bytes(bytes.to_vec())),
        })
    }
}

fn apply_cache_policy(headers: &mut Headers, cache: CachePolicy) {
    if headers.contains("cache-control") {
        return;
    }
    let directive = match cache {
        CachePolicy::NoStore => "no-store",
        CachePolicy::Reload | CachePolicy::NoCache => "no-cache",
        CachePolicy::Default | CachePolicy::ForceCache | CachePolicy::OnlyIfCached => return,
    };
    headers.set("cache-control", directive);
}

fn to_multipart(form: &FormData) -> Result<multipart::Form> {
    let mut multipart = multipart::Form::new();
    for entry in form.entries() {
        multipart = match &entry.value {
            FormValue::Text(value) => multipart.text(entry.name.clone(), value.clone()),
            FormValue::File { blob, filename } => {
                let mut part = multipart::Part::bytes(blob.bytes.clone());
                if let Some(filename) = filename {
                    part = part.file_name(filename.clone());
                }
                if !blob.content_type.is_empty() {
                    part = part.mime_str(&blob.content_type).map_err(|e| {
                        TunnelError::Codec(format!("invalid content type `{}` for form part: {e}", blob.content_type))
                    })?;
                }
                multipart.part(entry.name.clone(), part)
            }
        };
    }
    Ok(multipart)
}

fn map_reqwest_error(err: reqwest::Error) -> TunnelError {
    if err.is_timeout() {
        TunnelError::TimedOut
    } else if err.is_connect() {
        TunnelError::Network(format!("connection failed: {err}"))
    } else {
        TunnelError::Network(err.to_string())
    }
}
