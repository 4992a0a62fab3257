use hyper::header::{AsHeaderName, COOKIE};
use serde::de::DeserializeOwned;

use crate::identity::ClaimsPrincipal;
use crate::pipeline::PipelineRequest;

pub trait RequestExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
    fn cookie(&self, name: &str) -> Option<String>;
    fn query<T: DeserializeOwned + Default>(&self) -> T;
    /// The principal attached by session restore, if any.
    fn principal(&self) -> Option<&ClaimsPrincipal>;
}

impl RequestExt for PipelineRequest {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers()
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"').to_string())
    }

    fn query<T: DeserializeOwned + Default>(&self) -> T {
        self.uri()
            .query()
            .and_then(|query| serde_urlencoded::from_str(query).ok())
            .unwrap_or_default()
    }

    fn principal(&self) -> Option<&ClaimsPrincipal> {
        self.extensions().get::<ClaimsPrincipal>()
    }
}

#[cfg(test)]
mod tests {
    use hyper::body::Bytes;
    use hyper::Request;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct ReturnQuery {
        return_url: Option<String>,
    }

    #[test]
    fn test_cookie() {
        let request = Request::builder()
            .header(COOKIE, "theme=dark; .Storefront.Session=abc123")
            .header(COOKIE, "other=1")
            .body(Bytes::new())
            .unwrap();

        assert_eq!(
            request.cookie(".Storefront.Session"),
            Some("abc123".to_string())
        );
        assert_eq!(request.cookie("other"), Some("1".to_string()));
        assert_eq!(request.cookie("missing"), None);
    }

    #[test]
    fn test_query() {
        let request = Request::builder()
            .uri("/signin/google?returnUrl=%2FStoreManager")
            .body(Bytes::new())
            .unwrap();
        let query: ReturnQuery = request.query();
        assert_eq!(query.return_url.as_deref(), Some("/StoreManager"));

        let request = Request::builder().uri("/").body(Bytes::new()).unwrap();
        assert_eq!(request.query::<ReturnQuery>(), ReturnQuery::default());
    }

    #[test]
    fn test_principal_extension() {
        let mut request = Request::builder().body(Bytes::new()).unwrap();
        assert!(request.principal().is_none());

        request.extensions_mut().insert(ClaimsPrincipal::new());
        assert!(request.principal().is_some());
    }
}
