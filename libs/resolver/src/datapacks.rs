//! Vanilla Tweaks datapack bundler.
//!
//! The service takes a category -> pack names selection and answers with a
//! relative link to a zip containing every selected pack.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::{minor_version, ResolveError};

/// Default base URL of the Vanilla Tweaks site.
pub const DEFAULT_VANILLA_TWEAKS_URL: &str = "https://vanillatweaks.net";

const ZIP_ENDPOINT: &str = "/assets/server/zipdatapacks.php";

/// Group `(category, name)` pairs by category, preserving selection order
/// within a category.
pub fn group_by_category<'a, I>(packs: I) -> BTreeMap<&'a str, Vec<&'a str>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (category, name) in packs {
        grouped.entry(category).or_default().push(name);
    }
    grouped
}

/// Resolves a datapack selection to a single archive URL.
#[derive(Debug, Clone)]
pub struct DatapackResolver {
    client: reqwest::Client,
    base_url: String,
}

impl DatapackResolver {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Ask the bundler for an archive of `packs` built for `version`.
    ///
    /// `packs` yields `(category, name)` pairs. Only the minor part of
    /// `version` is sent.
    pub async fn archive_url<'a, I>(&self, version: &str, packs: I) -> Result<String, ResolveError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let selected = serde_json::to_string(&group_by_category(packs)).map_err(|source| {
            ResolveError::Decode {
                url: self.base_url.clone(),
                source,
            }
        })?;
        let form = [("version", minor_version(version)), ("packs", selected.as_str())];
        let url = format!("{}{ZIP_ENDPOINT}", self.base_url);

        let response = self.client.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            url = %url,
            status = %status,
            version = %form[0].1,
            packs = %selected,
            response = %body,
            "Made request to Vanilla Tweaks"
        );

        if !status.is_success() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let link = parse_link(&body)?;
        Ok(format!("{}{link}", self.base_url))
    }
}

fn parse_link(body: &str) -> Result<String, ResolveError> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|_| ResolveError::Datapack("response is not JSON".to_string()))?;

    match parsed.get("status") {
        None => return Err(ResolveError::Datapack("response has no status".to_string())),
        Some(Value::String(s)) if s == "success" => {}
        Some(Value::String(_)) => {
            return Err(ResolveError::Datapack("status was not 'success'".to_string()))
        }
        Some(_) => return Err(ResolveError::Datapack("status is not a string".to_string())),
    }

    match parsed.get("link") {
        None => Err(ResolveError::Datapack("response has no link".to_string())),
        Some(Value::String(link)) => check_link(link),
        Some(_) => Err(ResolveError::Datapack("link is not a string".to_string())),
    }
}

/// The link is appended to the base URL, so only a plain absolute path on
/// the same host is accepted.
fn check_link(link: &str) -> Result<String, ResolveError> {
    let plain = link
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, '\'' | '"' | '`' | '\\'));
    if !link.starts_with('/') || link.starts_with("//") || !plain {
        return Err(ResolveError::Datapack(format!("link {link:?} is not a relative path")));
    }
    Ok(link.to_string())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_group_by_category() {
        let grouped = group_by_category([
            ("survival", "graves"),
            ("items", "armored elytra"),
            ("survival", "afk display"),
        ]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["survival"], vec!["graves", "afk display"]);
        assert_eq!(grouped["items"], vec!["armored elytra"]);
    }

    #[test]
    fn test_parse_link_success() {
        let link = parse_link(r#"{"status":"success","link":"/download/abc.zip"}"#).unwrap();
        assert_eq!(link, "/download/abc.zip");
    }

    #[rstest]
    #[case::not_json("<html>")]
    #[case::no_status(r#"{"link":"/x.zip"}"#)]
    #[case::status_not_string(r#"{"status":1,"link":"/x.zip"}"#)]
    #[case::status_error(r#"{"status":"error","link":"/x.zip"}"#)]
    #[case::no_link(r#"{"status":"success"}"#)]
    #[case::link_not_string(r#"{"status":"success","link":false}"#)]
    #[case::link_absolute_url(r#"{"status":"success","link":"https://evil.example/x.zip"}"#)]
    #[case::link_protocol_relative(r#"{"status":"success","link":"//evil.example/x.zip"}"#)]
    #[case::link_shell_quote(r#"{"status":"success","link":"/d.zip'; touch /tmp/x; echo '"}"#)]
    #[case::link_whitespace(r#"{"status":"success","link":"/d.zip x"}"#)]
    fn test_parse_link_rejects(#[case] body: &str) {
        assert!(matches!(parse_link(body), Err(ResolveError::Datapack(_))));
    }
}
