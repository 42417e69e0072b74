//! Domain name and TTL helpers shared by the zone model and the query
//! engine.
//!
//! DNS names are case-insensitive on the wire (RFC 1035 §2.3.3) but
//! conventionally case-preserving in responses. The helpers here therefore
//! compare lowercased and leave the original spelling untouched; the owner
//! name of an emitted record is derived with [`transfer_case`] so the
//! client's casing wins for the labels it actually sent.

use std::str::FromStr;
use std::time::Duration;

use hickory_proto::rr::Name;

use crate::errors::AuthorityError;

/// Splits a name into its labels, honoring `\.` escapes as produced by
/// [`email_to_mbox`]. The trailing root label of a fully qualified name is
/// not included.
fn labels(name: &str) -> Vec<&str> {
    if name == "." {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (index, byte) in name.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' => escaped = true,
            b'.' => {
                out.push(&name[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if start < name.len() {
        out.push(&name[start..]);
    }

    out
}

/// Returns whether `name` is a syntactically valid domain name, and if
/// `require_fqdn` is set, also fully qualified.
pub fn is_domain(name: &str, require_fqdn: bool) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }

    let fqdn = name.ends_with('.') && !name.ends_with("\\.");
    if require_fqdn && !fqdn {
        return false;
    }

    if name == "." {
        return true;
    }

    let parts = labels(name);
    if parts.is_empty() {
        return false;
    }
    parts.iter().all(|label| {
        let unescaped = label.replace("\\.", ".").replace('\\', "");
        !unescaped.is_empty()
            && unescaped.len() <= 63
            && unescaped
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    })
}

/// Returns whether `name` lies at or below `zone` in label space. The
/// comparison is case-insensitive.
pub fn in_zone(zone: &str, name: &str) -> bool {
    let zone = zone.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    let zone_labels = labels(&zone);
    let name_labels = labels(&name);
    if zone_labels.len() > name_labels.len() {
        return false;
    }

    name_labels[name_labels.len() - zone_labels.len()..] == zone_labels[..]
}

/// Removes the zone suffix from `name` label-wise. The apex maps to the
/// empty string; a name outside the zone is returned unchanged.
pub fn trim_zone(zone: &str, name: &str) -> String {
    if !in_zone(zone, name) {
        return name.to_string();
    }

    let count = labels(zone).len();
    let name_labels = labels(name);
    name_labels[..name_labels.len() - count].join(".")
}

/// Takes the spelling of `destination` from `source` where `destination`
/// is a case-insensitive suffix of `source`. Labels the client did not
/// send keep the configured spelling.
pub fn transfer_case(source: &str, destination: &str) -> String {
    let source_lower = source.to_ascii_lowercase();
    let destination_lower = destination.to_ascii_lowercase();

    if source_lower.ends_with(&destination_lower) {
        source[source.len() - destination.len()..].to_string()
    } else {
        destination.to_string()
    }
}

/// Converts an email address to the SOA RNAME mbox form: dots in the local
/// part are escaped and the address is joined into a fully qualified name
/// (RFC 1035 §3.3.13).
pub fn email_to_mbox(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_string();
    };

    let local = local.replace('.', "\\.");
    fqdn(&format!("{local}.{domain}"))
}

/// Appends the root dot if `name` is not already fully qualified.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') && !name.ends_with("\\.") {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Converts a duration to whole seconds for a TTL wire field, rounding up.
pub fn duration_to_secs(duration: Duration) -> u32 {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs += 1;
    }

    secs.min(u64::from(u32::MAX)) as u32
}

/// Parses a presentation-format name for wire emission.
pub(crate) fn wire_name(name: &str) -> Result<Name, AuthorityError> {
    Name::from_str(name).map_err(|_| AuthorityError::InvalidName(name.to_string()))
}
