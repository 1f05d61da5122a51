//! Private credential store enumeration.

use tracing::debug;

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::host::{CookieSpec, CookieStoreApi, CredentialStoreRef, SameSite, StoreListing};
use crate::token::Token;

/// Turn whatever the cookie-store API reports into the private stores, in
/// enumeration order.
///
/// Flagged listings are filtered on their flag. Positional listings only
/// carry identifiers: the first one is the default store and every later one
/// belongs to a private context.
pub fn private_stores(listing: StoreListing) -> Vec<CredentialStoreRef> {
    match listing {
        StoreListing::Flagged(stores) => stores.into_iter().filter(|s| s.is_private).collect(),
        StoreListing::Positional(ids) => ids
            .into_iter()
            .skip(1)
            .map(|id| CredentialStoreRef::new(id, true))
            .collect(),
    }
}

/// Enumerate the private stores afresh; store lifetimes are owned by the host.
pub async fn enumerate_private_stores(api: &dyn CookieStoreApi) -> Result<Vec<CredentialStoreRef>> {
    let listing = api.list_stores().await?;
    let stores = private_stores(listing);
    debug!(count = stores.len(), "Enumerated private credential stores");
    Ok(stores)
}

/// The cookie installed for a token: domain-wide, root path, http-only,
/// secure, no same-site restriction, session lifetime.
pub fn token_cookie(config: &BootstrapConfig, token: &Token) -> CookieSpec {
    CookieSpec {
        url: config.cookie_url.clone(),
        name: config.cookie_name.clone(),
        value: token.as_str().to_string(),
        domain: config.cookie_domain.clone(),
        path: "/".to_string(),
        http_only: true,
        secure: true,
        same_site: SameSite::NoRestriction,
        expiration_date: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flagged_listing_keeps_private_stores_in_order() {
        let listing = StoreListing::Flagged(vec![
            CredentialStoreRef::new("firefox-default", false),
            CredentialStoreRef::new("firefox-private", true),
            CredentialStoreRef::new("firefox-container-1", false),
            CredentialStoreRef::new("firefox-private-2", true),
        ]);

        let ids: Vec<_> = private_stores(listing).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["firefox-private", "firefox-private-2"]);
    }

    #[test]
    fn test_positional_listing_skips_default_store() {
        let listing = StoreListing::Positional(vec!["0".into(), "1".into(), "2".into()]);
        assert_eq!(
            private_stores(listing),
            vec![
                CredentialStoreRef::new("1", true),
                CredentialStoreRef::new("2", true)
            ]
        );
        assert!(private_stores(StoreListing::Positional(vec!["0".into()])).is_empty());
        assert!(private_stores(StoreListing::Positional(vec![])).is_empty());
    }

    #[test]
    fn test_token_cookie_attributes() {
        let cookie = token_cookie(&BootstrapConfig::default(), &Token::new("abc"));
        assert_eq!(cookie.name, "NID");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain, ".google.com");
        assert_eq!(cookie.url, "https://www.google.com");
        assert_eq!(cookie.path, "/");
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::NoRestriction);
        assert_eq!(cookie.expiration_date, None);
    }
}
