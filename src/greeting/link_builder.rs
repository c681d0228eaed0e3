#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use poem::Request;
use poem::http::header;

use crate::greeting::representation::{Link, REL_SELF};
use crate::utils::config::Config;
use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
pub const GREETING_PATH     : &str = "/greeting";
pub const NAME_PARAM        : &str = "name";

const X_FORWARDED_HOST      : &str = "X-Forwarded-Host";
const X_FORWARDED_PROTO     : &str = "X-Forwarded-Proto";

// ***************************************************************************
//                               LinkBuilder
// ***************************************************************************
/** Computes the externally visible URLs embedded in representations.
 *
 * The base URL is chosen per request, first match wins:
 *
 *   1. the configured external_url,
 *   2. X-Forwarded-Host, with X-Forwarded-Proto or the server scheme,
 *   3. the Host header with the server scheme,
 *   4. the authority of an absolute-form request URI,
 *   5. the configured http_addr and http_port.
 */
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    external_url: Option<String>,
    scheme: &'static str,
    default_base_url: String,
}

impl LinkBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            external_url: config.external_url.as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            scheme: config.scheme(),
            default_base_url: config.default_base_url(),
        }
    }

    // ---------------------------------------------------------------------------
    // self_link:
    // ---------------------------------------------------------------------------
    /** The self link of a greeting for the resolved name.  The default name is
     * not special-cased, so it always appears in the query string.
     */
    pub fn self_link(&self, http_req: &Request, name: &str) -> Result<Link> {
        let base_url = self.base_url(http_req)?;
        Ok(Link::new(REL_SELF, build_href(&base_url, GREETING_PATH, &[(NAME_PARAM, name)])))
    }

    // ---------------------------------------------------------------------------
    // base_url:
    // ---------------------------------------------------------------------------
    pub fn base_url(&self, http_req: &Request) -> Result<String> {
        if let Some(url) = &self.external_url {
            return Ok(url.clone());
        }

        if let Some(host) = first_value(header_str(http_req, X_FORWARDED_HOST)?) {
            let scheme = first_value(header_str(http_req, X_FORWARDED_PROTO)?)
                .unwrap_or(self.scheme);
            return Ok(format!("{}://{}", scheme, host));
        }

        if let Some(host) = header_str(http_req, header::HOST.as_str())? {
            if !host.is_empty() {
                return Ok(format!("{}://{}", self.scheme, host));
            }
        }

        let uri = http_req.uri();
        if let Some(authority) = uri.authority() {
            return Ok(format!("{}://{}", uri.scheme_str().unwrap_or(self.scheme), authority));
        }

        Ok(self.default_base_url.clone())
    }
}

// ***************************************************************************
//                             Public Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// build_href:
// ---------------------------------------------------------------------------
/** Join the base URL, route path and query parameters.  Parameter values are
 * percent-encoded; everything outside the unreserved set is escaped, so a
 * space becomes %20 and an ampersand %26.
 */
pub fn build_href(base_url: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut href = String::with_capacity(base_url.len() + path.len() + 32);
    href.push_str(base_url);
    href.push_str(path);
    for (i, (key, value)) in query.iter().enumerate() {
        href.push(if i == 0 {'?'} else {'&'});
        href.push_str(&urlencoding::encode(key));
        href.push('=');
        href.push_str(&urlencoding::encode(value));
    }
    href
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// header_str:
// ---------------------------------------------------------------------------
fn header_str<'a>(http_req: &'a Request, name: &str) -> Result<Option<&'a str>> {
    match http_req.headers().get(name) {
        Some(v) => match v.to_str() {
            Ok(s) => Ok(Some(s.trim())),
            Err(_) => Err(anyhow!(Errors::InvalidHeader(name.to_string()))),
        },
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// first_value:
// ---------------------------------------------------------------------------
// Proxies append to forwarding headers; the first entry is the client-facing one.
fn first_value(value: Option<&str>) -> Option<&str> {
    value
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use poem::http::{HeaderValue, Uri};

    fn builder() -> LinkBuilder {
        LinkBuilder::new(&Config::new())
    }

    fn request(uri: &'static str) -> poem::RequestBuilder {
        Request::builder().uri(Uri::from_static(uri))
    }

    #[test]
    fn href_plain_name() {
        assert_eq!(build_href("http://localhost:8080", GREETING_PATH, &[(NAME_PARAM, "User")]),
                   "http://localhost:8080/greeting?name=User");
    }

    #[test]
    fn href_empty_name() {
        assert_eq!(build_href("", GREETING_PATH, &[(NAME_PARAM, "")]), "/greeting?name=");
    }

    #[test]
    fn href_encodes_reserved_characters() {
        let href = build_href("http://localhost:8080", GREETING_PATH,
                              &[(NAME_PARAM, "Jane Doe & Co=1?")]);
        assert_eq!(href, "http://localhost:8080/greeting?name=Jane%20Doe%20%26%20Co%3D1%3F");

        let encoded = href.rsplit_once("name=").unwrap().1;
        assert_eq!(urlencoding::decode(encoded).unwrap(), "Jane Doe & Co=1?");
    }

    #[test]
    fn href_multiple_parameters() {
        assert_eq!(build_href("", "/x", &[("a", "1"), ("b", "2")]), "/x?a=1&b=2");
    }

    #[test]
    fn self_link_uses_host_header() {
        let req = request("/greeting").header("Host", "example.org:9000").finish();
        let link = builder().self_link(&req, "World").unwrap();
        assert_eq!(link.relation(), "self");
        assert_eq!(link.href(), "http://example.org:9000/greeting?name=World");
    }

    #[test]
    fn forwarded_headers_win_over_host() {
        let req = request("/greeting")
            .header("Host", "10.0.0.7:8080")
            .header("X-Forwarded-Host", "api.example.org, proxy.internal")
            .header("X-Forwarded-Proto", "https")
            .finish();
        assert_eq!(builder().base_url(&req).unwrap(), "https://api.example.org");
    }

    #[test]
    fn forwarded_host_without_proto_uses_server_scheme() {
        let req = request("/greeting").header("X-Forwarded-Host", "api.example.org").finish();
        assert_eq!(builder().base_url(&req).unwrap(), "http://api.example.org");

        let tls = Config { tls_enabled: true, ..Config::new() };
        assert_eq!(LinkBuilder::new(&tls).base_url(&req).unwrap(), "https://api.example.org");
    }

    #[test]
    fn external_url_wins_over_headers() {
        let config = Config { external_url: Some("https://greet.example.org/".to_string()),
                              ..Config::new() };
        let req = request("/greeting")
            .header("Host", "localhost")
            .header("X-Forwarded-Host", "api.example.org")
            .finish();
        assert_eq!(LinkBuilder::new(&config).base_url(&req).unwrap(), "https://greet.example.org");
    }

    #[test]
    fn absolute_form_uri_authority() {
        let req = request("http://proxy.example:81/greeting").finish();
        assert_eq!(builder().base_url(&req).unwrap(), "http://proxy.example:81");
    }

    #[test]
    fn falls_back_to_configured_address() {
        let req = request("/greeting").finish();
        assert_eq!(builder().base_url(&req).unwrap(), "http://localhost:8080");
    }

    #[test]
    fn non_ascii_header_is_rejected() {
        let req = request("/greeting")
            .header("Host", HeaderValue::from_bytes(b"caf\xe9.example").unwrap())
            .finish();
        let err = builder().base_url(&req).unwrap_err();
        assert!(matches!(err.downcast_ref::<Errors>(), Some(Errors::InvalidHeader(_))));
    }
}
