#![forbid(unsafe_code)]

use poem::Request;
use poem_openapi::{ OpenApi, payload::Json, param::Query, ApiResponse };
use anyhow::{Result, anyhow};
use log::error;

use crate::greeting::link_builder::{LinkBuilder, NAME_PARAM};
use crate::greeting::representation::Greeting;
use crate::utils::errors::{Errors, HttpResult};
use crate::utils::greeting_utils::{self, RequestDebug};

// Name used when the request doesn't supply one.
pub const DEFAULT_NAME: &str = "World";

// ***************************************************************************
//                          Request/Response Definitions
// ***************************************************************************
pub struct GreetingApi {
    links: LinkBuilder,
}

struct ReqGreeting
{
    name: String,
}

// Implement the debug record trait for logging.
impl RequestDebug for ReqGreeting {
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64 + self.name.len());
        s.push_str("  Request parameters:");
        s.push_str("\n    name: ");
        s.push_str(&self.name);
        s
    }
}

// ------------------- HTTP Status Codes -------------------
#[derive(Debug, ApiResponse)]
enum GreetingResponse {
    #[oai(status = 200)]
    Http200(Json<Greeting>),
    #[oai(status = 400)]
    Http400(Json<HttpResult>),
    #[oai(status = 500)]
    Http500(Json<HttpResult>),
}

fn make_http_200(resp: Greeting) -> GreetingResponse {
    GreetingResponse::Http200(Json(resp))
}
fn make_http_400(msg: String) -> GreetingResponse {
    GreetingResponse::Http400(Json(HttpResult::new(400.to_string(), msg)))
}
fn make_http_500(msg: String) -> GreetingResponse {
    GreetingResponse::Http500(Json(HttpResult::new(500.to_string(), msg)))
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl GreetingApi {
    #[oai(path = "/greeting", method = "get")]
    async fn get_greeting_api(&self, http_req: &Request, name: Query<Option<String>>) -> GreetingResponse {
        // An empty name is a name; only an absent parameter gets the default.
        let req = ReqGreeting { name: name.0.unwrap_or_else(|| DEFAULT_NAME.to_string()) };

        match self.process(http_req, &req) {
            Ok(g) => make_http_200(g),
            Err(e) => {
                let msg = "ERROR: ".to_owned() + e.to_string().as_str();
                error!("{}", msg);
                match e.downcast_ref::<Errors>() {
                    Some(Errors::InvalidHeader(_)) |
                    Some(Errors::InvalidQueryEncoding(_)) => make_http_400(msg),
                    _ => make_http_500(msg),
                }
            }
        }
    }
}

// ***************************************************************************
//                          Request/Response Methods
// ***************************************************************************
impl GreetingApi {
    pub fn new(links: LinkBuilder) -> Self {
        Self { links }
    }

    /// Build the greeting and attach its self link.
    fn process(&self, http_req: &Request, req: &ReqGreeting) -> Result<Greeting> {
        // Conditional logging depending on log level.
        greeting_utils::debug_request(http_req, req);

        // The parameter extractor decodes leniently, so check the raw form.
        check_query_encoding(http_req.uri().query(), NAME_PARAM)?;

        let link = self.links.self_link(http_req, &req.name)?;
        Ok(Greeting::new(&req.name).with_link(link))
    }
}

// ***************************************************************************
//                          Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// check_query_encoding:
// ---------------------------------------------------------------------------
/** Reject any raw value of the named query parameter that has a '%' not
 * followed by two hex digits, or that decodes to invalid UTF-8.
 */
fn check_query_encoding(query: Option<&str>, param: &str) -> Result<()> {
    let query = match query {
        Some(q) => q,
        None => return Ok(()),
    };

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if urlencoding::decode(key).map(|k| k != param).unwrap_or(true) {
            continue;
        }

        let bytes = value.as_bytes();
        let well_formed = bytes.iter().enumerate()
            .filter(|(_, b)| **b == b'%')
            .all(|(i, _)| bytes.len() > i + 2
                          && bytes[i + 1].is_ascii_hexdigit()
                          && bytes[i + 2].is_ascii_hexdigit());
        if !well_formed || urlencoding::decode(&value.replace('+', " ")).is_err() {
            return Err(anyhow!(Errors::InvalidQueryEncoding(param.to_string())));
        }
    }
    Ok(())
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::Config;
    use poem::http::{HeaderValue, StatusCode};
    use poem::test::TestClient;
    use poem_openapi::OpenApiService;
    use serde_json::json;

    const BASE: &str = "http://greeting.example";

    fn client() -> TestClient<poem::Route> {
        let config = Config { external_url: Some(BASE.to_string()), ..Config::new() };
        let api = OpenApiService::new(GreetingApi::new(LinkBuilder::new(&config)), "test", "0.0.1");
        TestClient::new(poem::Route::new().nest("/", api))
    }

    #[tokio::test]
    async fn default_name() {
        let resp = client().get("/greeting").send().await;
        resp.assert_status_is_ok();
        resp.assert_content_type("application/json; charset=utf-8");
        resp.assert_json(json!({
            "links": [{"rel": "self", "href": "http://greeting.example/greeting?name=World"}],
            "content": "Hello, World!",
        })).await;
    }

    #[tokio::test]
    async fn default_matches_explicit_world() {
        let cli = client();
        let implicit = cli.get("/greeting").send().await.0.into_body().into_string().await.unwrap();
        let explicit = cli.get("/greeting").query("name", &"World").send().await
            .0.into_body().into_string().await.unwrap();
        assert_eq!(implicit, explicit);
    }

    #[tokio::test]
    async fn named_user() {
        let resp = client().get("/greeting").query("name", &"User").send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "links": [{"rel": "self", "href": "http://greeting.example/greeting?name=User"}],
            "content": "Hello, User!",
        })).await;
    }

    #[tokio::test]
    async fn empty_name_is_kept() {
        let resp = client().get("/greeting?name=").send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "links": [{"rel": "self", "href": "http://greeting.example/greeting?name="}],
            "content": "Hello, !",
        })).await;
    }

    #[tokio::test]
    async fn body_round_trips() {
        let name = "Jane Doe & Co";
        let resp = client().get("/greeting").query("name", &name).send().await;
        resp.assert_status_is_ok();

        let body = resp.0.into_body().into_string().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["content", "links"]);
        assert_eq!(obj["content"], "Hello, Jane Doe & Co!");

        let links = obj["links"].as_array().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0]["rel"], "self");

        let href = links[0]["href"].as_str().unwrap();
        assert_eq!(href, "http://greeting.example/greeting?name=Jane%20Doe%20%26%20Co");
        let encoded = href.rsplit_once("?name=").unwrap().1;
        assert_eq!(urlencoding::decode(encoded).unwrap(), name);
    }

    #[tokio::test]
    async fn forwarded_host_used_without_external_url() {
        let api = OpenApiService::new(GreetingApi::new(LinkBuilder::new(&Config::new())), "test", "0.0.1");
        let cli = TestClient::new(poem::Route::new().nest("/", api));
        let resp = cli.get("/greeting")
            .query("name", &"User")
            .header("X-Forwarded-Host", "api.example.org")
            .header("X-Forwarded-Proto", "https")
            .send().await;
        resp.assert_status_is_ok();
        resp.assert_json(json!({
            "links": [{"rel": "self", "href": "https://api.example.org/greeting?name=User"}],
            "content": "Hello, User!",
        })).await;
    }

    #[tokio::test]
    async fn malformed_forwarded_host_is_bad_request() {
        let api = OpenApiService::new(GreetingApi::new(LinkBuilder::new(&Config::new())), "test", "0.0.1");
        let cli = TestClient::new(poem::Route::new().nest("/", api));
        let resp = cli.get("/greeting")
            .header("X-Forwarded-Host", HeaderValue::from_bytes(b"caf\xe9").unwrap())
            .send().await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        resp.json().await.value().object().get("result_code").assert_string("400");
    }

    #[tokio::test]
    async fn bad_percent_escape_is_bad_request() {
        let resp = client().get("/greeting?name=%ZZ").send().await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        resp.json().await.value().object().get("result_code").assert_string("400");
    }

    #[tokio::test]
    async fn invalid_utf8_escape_is_bad_request() {
        let resp = client().get("/greeting?name=%FF").send().await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        resp.json().await.value().object().get("result_code").assert_string("400");
    }

    #[tokio::test]
    async fn default_body_keeps_field_order() {
        let resp = client().get("/greeting").send().await;
        resp.assert_status_is_ok();
        let body = resp.0.into_body().into_string().await.unwrap();
        assert_eq!(body, concat!(r#"{"links":[{"rel":"self","href":"http://greeting.example/greeting?name=World"}],"#,
                                 r#""content":"Hello, World!"}"#));
    }

    #[tokio::test]
    async fn empty_name_body_keeps_field_order() {
        let resp = client().get("/greeting?name=").send().await;
        let body = resp.0.into_body().into_string().await.unwrap();
        assert_eq!(body, r#"{"links":[{"rel":"self","href":"http://greeting.example/greeting?name="}],"content":"Hello, !"}"#);
    }

    #[test]
    fn query_encoding_checks() {
        assert!(check_query_encoding(None, NAME_PARAM).is_ok());
        assert!(check_query_encoding(Some("name=Jane%20Doe+%26%20Co"), NAME_PARAM).is_ok());
        assert!(check_query_encoding(Some("name=%C3%A9"), NAME_PARAM).is_ok());
        assert!(check_query_encoding(Some("name="), NAME_PARAM).is_ok());
        assert!(check_query_encoding(Some("other=%ZZ&name=ok"), NAME_PARAM).is_ok());

        for bad in ["name=%ZZ", "name=%FF", "name=abc%", "name=%4", "x=1&name=%E9"] {
            let err = check_query_encoding(Some(bad), NAME_PARAM).unwrap_err();
            assert!(matches!(err.downcast_ref::<Errors>(), Some(Errors::InvalidQueryEncoding(_))), "{}", bad);
        }
    }
}
