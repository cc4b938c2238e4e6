//! Matching a connecting device against its stored credential records.
//!
//! Secret-dependent comparisons use [`subtle::ConstantTimeEq`].

use lwm2m_bootstrap_core::identity::common_name;
use lwm2m_bootstrap_core::EndpointName;
use subtle::ConstantTimeEq;

use crate::security::{Credential, SecurityInfo};

/// Does any record bound to `endpoint` accept the PSK identity the device
/// completed its handshake with?
///
/// An empty record set is a refusal.
pub fn check_psk(endpoint: &EndpointName, psk_identity: &str, records: &[SecurityInfo]) -> bool {
    records.iter().any(|info| {
        let Credential::Psk { identity, .. } = &info.credential else {
            return false;
        };
        info.endpoint == *endpoint && bool::from(identity.as_bytes().ct_eq(psk_identity.as_bytes()))
    })
}

/// Does any record bound to `endpoint` carry exactly this raw public key?
pub fn check_rpk(endpoint: &EndpointName, public_key: &[u8], records: &[SecurityInfo]) -> bool {
    records.iter().any(|info| {
        let Credential::Rpk { public_key: expected } = &info.credential else {
            return false;
        };
        info.endpoint == *endpoint && bool::from(expected.as_slice().ct_eq(public_key))
    })
}

/// Certificate subjects authorize by common name alone; whether a bootstrap
/// configuration exists is checked by the caller.
pub fn check_x509(endpoint: &EndpointName, subject: &str) -> bool {
    common_name(subject) == Some(endpoint.as_str())
}
