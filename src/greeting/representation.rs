#![forbid(unsafe_code)]

use poem_openapi::Object;
use serde::{Deserialize, Serialize};

// Relation name of the link pointing back at the returned representation.
pub const REL_SELF: &str = "self";

// ***************************************************************************
//                               Link
// ***************************************************************************
/// One hypermedia relation, serialized as `{"rel": ..., "href": ...}`.
#[derive(Object, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    #[oai(rename = "rel")]
    #[serde(rename = "rel")]
    relation: String,
    href: String,
}

impl Link {
    pub fn new(relation: &str, href: String) -> Self {
        Self { relation: relation.to_string(), href }
    }

    #[cfg(test)]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    #[cfg(test)]
    pub fn href(&self) -> &str {
        &self.href
    }
}

// ***************************************************************************
//                               Greeting
// ***************************************************************************
/// The greeting representation.  Links serialize ahead of the content and
/// keep their insertion order.
#[derive(Object, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Greeting {
    links: Vec<Link>,
    content: String,
}

impl Greeting {
    /// Render the greeting for an already resolved name.  No links are
    /// attached yet.
    pub fn new(name: &str) -> Self {
        Self { links: vec!(), content: format!("Hello, {}!", name) }
    }

    /// Attach a link, consuming and returning the representation.
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    #[cfg(test)]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[cfg(test)]
    pub fn links(&self) -> &[Link] {
        &self.links
    }
}
