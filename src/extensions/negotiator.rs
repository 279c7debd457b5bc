//! Server-side Sec-WebSocket-Extensions negotiation.

use std::sync::Arc;

use tracing::debug;

use crate::config::Limits;
use crate::extensions::{Extension, ExtensionChain, ExtensionFactory, ExtensionOffer};

/// Negotiate the client's extension offers against the supported factories.
///
/// Offers are considered in request order. Each offer goes to the factory
/// with the same name; unknown names, malformed offers, declined offers,
/// repeated names and RSV bit conflicts are skipped. Accepted extensions
/// join the chain in acceptance order and their response entries are joined
/// with `", "`.
///
/// Returns the chain and the response header value, `None` when nothing was
/// accepted.
pub fn negotiate_extensions(
    header: Option<&str>,
    supported: &[Arc<dyn ExtensionFactory>],
    limits: &Limits,
) -> (ExtensionChain, Option<String>) {
    let mut chain = ExtensionChain::new();
    let mut response = String::new();

    let Some(header) = header else {
        return (chain, None);
    };

    for token in header.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let offer = match ExtensionOffer::parse(token) {
            Ok(offer) => offer,
            Err(err) => {
                debug!(offer = token, error = %err, "Skipping malformed extension offer");
                continue;
            }
        };

        let Some(factory) = supported
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(&offer.name))
        else {
            debug!(extension = %offer.name, "Skipping unsupported extension");
            continue;
        };

        if chain.contains(factory.name()) {
            debug!(extension = %offer.name, "Extension already negotiated, skipping offer");
            continue;
        }

        let Some(extension) = factory.negotiate(&offer.params, limits) else {
            debug!(offer = %offer, "Extension offer declined");
            continue;
        };

        if !chain.accepts(extension.as_ref()) {
            debug!(extension = %offer.name, "Extension RSV bits conflict, skipping offer");
            release(extension);
            continue;
        }

        let mut entry = String::new();
        extension.append_response_header(&mut entry);

        match chain.push(extension) {
            Ok(()) => {
                if !response.is_empty() {
                    response.push_str(", ");
                }
                response.push_str(&entry);
            }
            Err(err) => debug!(error = %err, "Failed to activate extension"),
        }
    }

    debug!(extensions = ?chain.names(), "Extensions negotiated");
    let response = (!response.is_empty()).then_some(response);
    (chain, response)
}

/// Release an instance that was created but never joined the chain.
fn release(mut extension: Box<dyn Extension>) {
    if let Err(err) = extension.close() {
        debug!(extension = extension.name(), error = %err, "Failed to release skipped extension");
    }
}
