use intentmesh_core::{MeshError, MeshResult};
use parking_lot::Mutex;
use tracing::warn;
use url::Url;

/// Query parameter carrying the store address.
pub const DB_PARAM: &str = "db";
/// Query parameter carrying comma-separated peer addresses.
pub const PEERS_PARAM: &str = "peers";

/// A shareable store address plus optional direct peer hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// Address of the store to join.
    pub address: String,
    /// Peer addresses to dial directly; empty means ambient discovery.
    pub peers: Vec<String>,
}

impl Invitation {
    pub fn new(address: impl Into<String>, peers: Vec<String>) -> Self {
        Self {
            address: address.into(),
            peers,
        }
    }

    /// Extract an invitation from a link's query string.
    ///
    /// Returns `Ok(None)` when the link has no non-empty `db` parameter.
    pub fn from_link(link: &str) -> MeshResult<Option<Self>> {
        let url = Url::parse(link)
            .map_err(|e| MeshError::Validation(format!("invalid link '{link}': {e}")))?;

        let mut address = None;
        let mut peers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                DB_PARAM => {
                    let v = value.trim();
                    if !v.is_empty() {
                        address = Some(v.to_string());
                    }
                }
                PEERS_PARAM => {
                    peers.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }

        Ok(address.map(|address| Self { address, peers }))
    }

    /// Build a shareable link on top of `base`, keeping its other parameters.
    pub fn to_link(&self, base: &str) -> MeshResult<String> {
        let mut url = Url::parse(&strip_invitation_params(base)?)
            .map_err(|e| MeshError::Validation(format!("invalid base link '{base}': {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(DB_PARAM, &self.address);
            if !self.peers.is_empty() {
                pairs.append_pair(PEERS_PARAM, &self.peers.join(","));
            }
        }
        Ok(url.into())
    }
}

/// Remove `db` and `peers` from a link, leaving everything else intact.
pub fn strip_invitation_params(link: &str) -> MeshResult<String> {
    let mut url = Url::parse(link)
        .map_err(|e| MeshError::Validation(format!("invalid link '{link}': {e}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != DB_PARAM && k != PEERS_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(url.into())
}

/// The link the application was opened with, standing in for the address bar.
///
/// The join orchestrator reads the invitation from it and clears the
/// invitation parameters after a successful join so a reload does not
/// trigger the invitation flow again.
pub struct LinkContext {
    current: Mutex<String>,
}

impl LinkContext {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(link.into()),
        }
    }

    pub fn current(&self) -> String {
        self.current.lock().clone()
    }

    /// The invitation carried by the current link, if any. Malformed links yield `None`.
    pub fn invitation(&self) -> Option<Invitation> {
        let link = self.current();
        match Invitation::from_link(&link) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(error = %e, "ignoring malformed link");
                None
            }
        }
    }

    /// Strip the invitation parameters from the current link.
    pub fn clear_invitation(&self) {
        let mut current = self.current.lock();
        match strip_invitation_params(&current) {
            Ok(stripped) => *current = stripped,
            Err(e) => warn!(error = %e, "could not clear invitation from link"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_db_and_peers() {
        let link = "https://app.example/?db=%2Forbitdb%2Fzdpu%2Fintentions&peers=%2Fip4%2F1.2.3.4%2Ftcp%2F4001%2Cp2%2C%20";
        let inv = Invitation::from_link(link).unwrap().unwrap();
        assert_eq!(inv.address, "/orbitdb/zdpu/intentions");
        assert_eq!(inv.peers, vec!["/ip4/1.2.3.4/tcp/4001", "p2"]);
    }

    #[test]
    fn test_no_db_means_no_invitation() {
        assert!(Invitation::from_link("https://app.example/?peers=a")
            .unwrap()
            .is_none());
        assert!(Invitation::from_link("https://app.example/?db=")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_db_without_peers() {
        let inv = Invitation::from_link("https://app.example/?db=abc")
            .unwrap()
            .unwrap();
        assert!(inv.peers.is_empty());
    }

    #[test]
    fn test_invalid_link_is_validation_error() {
        assert!(matches!(
            Invitation::from_link("not a url"),
            Err(MeshError::Validation(_))
        ));
    }

    #[test]
    fn test_link_roundtrip_keeps_other_params() {
        let inv = Invitation::new("/orbitdb/x", vec!["/p2p/a".into(), "/p2p/b".into()]);
        let link = inv.to_link("https://app.example/join?lang=es").unwrap();
        assert!(link.contains("lang=es"));
        assert_eq!(Invitation::from_link(&link).unwrap().unwrap(), inv);
    }

    #[test]
    fn test_strip_params() {
        let stripped =
            strip_invitation_params("https://app.example/?lang=es&db=x&peers=a%2Cb").unwrap();
        assert_eq!(stripped, "https://app.example/?lang=es");

        let bare = strip_invitation_params("https://app.example/?db=x").unwrap();
        assert_eq!(bare, "https://app.example/");
    }

    #[test]
    fn test_link_context_clear() {
        let ctx = LinkContext::new("https://app.example/?db=x&peers=p");
        assert!(ctx.invitation().is_some());
        ctx.clear_invitation();
        assert!(ctx.invitation().is_none());
        assert_eq!(ctx.current(), "https://app.example/");
    }
}
