//! Parsing and canonical formatting of viewspec strings.
//!
//! ```text
//! spec     := [service] ["[" params "]"] ["/" path]
//! params   := param (";" param)*
//! param    := key "=" value | value          bare values bind to "data"
//! ```
//!
//! Formatting sorts `key=value` fragments so that equal requests always
//! produce byte-identical specs.

use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::model::{DEFAULT_PARAMETER, ParameterRequest, SpawnRequest, SpawnResolution};

const PARAMETER_START: char = '[';
const PARAMETER_END: char = ']';
const FRAGMENT_SEPARATOR: char = ';';
const KEY_SEPARATOR: char = '=';
const PATH_SEPARATOR: char = '/';

/// Parse `spec` into a request plus the trailing routing path, if any.
///
/// The path is not part of the request identity; it is returned with its
/// leading `/`.
pub fn parse_spawn_request(
    spec: &str,
    force_read_only: bool,
    url_prefix: &str,
) -> Result<(SpawnRequest, Option<String>), ParseError> {
    let (service_name, section) = match spec.split_once(PARAMETER_START) {
        Some((service, rest)) => (service, Some(rest)),
        None => (spec, None),
    };

    let (service_name, params, path) = match section {
        Some(rest) => {
            let (params, path) = split_parameter_section(spec, rest)?;
            (service_name, params, path)
        }
        None => match service_name.split_once(PATH_SEPARATOR) {
            Some((service, path)) => (service, "", Some(format!("{PATH_SEPARATOR}{path}"))),
            None => (service_name, "", None),
        },
    };

    let mut request = SpawnRequest {
        service_name: service_name.to_string(),
        url_prefix: url_prefix.to_string(),
        force_read_only,
        ..SpawnRequest::default()
    };

    for fragment in params.split(FRAGMENT_SEPARATOR) {
        if fragment.is_empty() {
            continue;
        }
        if fragment.contains([PARAMETER_START, PARAMETER_END]) {
            return Err(malformed(spec, fragment));
        }
        let (key, value) = match fragment.split_once(KEY_SEPARATOR) {
            Some(("", _)) => return Err(malformed(spec, fragment)),
            Some((key, value)) => (key, value),
            None => (DEFAULT_PARAMETER, fragment),
        };
        request
            .parameters
            .insert(key.to_string(), ParameterRequest::new(value));
    }

    Ok((request, path))
}

/// Split the text after `[` into the parameter body and an optional `/path`.
fn split_parameter_section<'a>(
    spec: &str,
    rest: &'a str,
) -> Result<(&'a str, Option<String>), ParseError> {
    if let Some(params) = rest.strip_suffix(PARAMETER_END) {
        return Ok((params, None));
    }
    match rest.find("]/") {
        Some(end) => Ok((&rest[..end], Some(rest[end + 1..].to_string()))),
        None => Err(ParseError::UnterminatedParameters {
            spec: spec.to_string(),
        }),
    }
}

fn malformed(spec: &str, fragment: &str) -> ParseError {
    ParseError::MalformedFragment {
        spec: spec.to_string(),
        fragment: fragment.to_string(),
    }
}

fn join_spec(service_name: &str, mut fragments: Vec<String>) -> String {
    fragments.sort();
    format!(
        "{service_name}{PARAMETER_START}{}{PARAMETER_END}",
        fragments.join(&FRAGMENT_SEPARATOR.to_string())
    )
}

impl SpawnRequest {
    /// Canonical spec of the raw request; the flag is false while the service is unknown.
    pub fn format(&self) -> (String, bool) {
        let fragments = self
            .parameters
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| format!("{key}{KEY_SEPARATOR}{value}"))
            .collect();
        (
            join_spec(&self.service_name, fragments),
            !self.service_name.is_empty(),
        )
    }
}

impl SpawnResolution {
    /// Canonical spec of the resolution, leaving out implicit parameters.
    pub fn format(&self) -> (String, bool) {
        let fragments = self
            .parameters
            .iter()
            .filter(|(_, parameter)| !parameter.implicit)
            .map(|(key, parameter)| format!("{key}{KEY_SEPARATOR}{}", parameter.format()))
            .collect();
        (
            join_spec(&self.service_name, fragments),
            !self.service_name.is_empty(),
        )
    }

    /// Logical identity of the resolution.
    ///
    /// Covers the canonical spec and the spawn template, so an updated
    /// definition changes the digest even when the parameters did not.
    pub fn digest(&self) -> String {
        let (spec, _) = self.format();
        let template = serde_json::to_vec(&self.spawn).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(spec.as_bytes());
        hasher.update([0u8]);
        hasher.update(&template);
        if let Some(grace) = self.grace_period_seconds {
            hasher.update(grace.to_be_bytes());
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}
