// SPDX-License-Identifier: MIT
//! Catalog resolution for named positions.
//!
//! Finalized wizard runs and accepted guard suggestions arrive as names
//! with quantities but without prices.  The extraction service maps a name
//! to a priced catalog position.  Resolution must never block an accept or
//! a finalize: any failure falls back to a zero-priced position the user
//! prices by hand, announced through a resolution notice.

use tracing::warn;

use crate::events::{EventBus, OfferEvent};
use crate::services::{ExtractionService, GuardSuggestion, RawPosition, WizardPosition};

/// Fallback unit when a suggestion does not name one.
const DEFAULT_EINHEIT: &str = "Stk";

/// Resolve one name to a priced position.
///
/// `menge: Some(_)` overrides whatever quantity the catalog suggests; the
/// caller knows the job, the catalog only knows the article.
pub async fn resolve_named(
    extraction: &dyn ExtractionService,
    name: &str,
    menge: Option<f64>,
    einheit: &str,
    events: &EventBus,
) -> RawPosition {
    match extraction.extract(name).await {
        Ok(mut resp) if !resp.positions.is_empty() => {
            let mut pos = resp.positions.remove(0);
            if let Some(menge) = menge {
                pos.menge = menge;
            } else if pos.menge == 0.0 {
                pos.menge = 1.0;
            }
            if pos.einheit.is_empty() {
                pos.einheit = einheit.to_string();
            }
            pos
        }
        Ok(_) => {
            warn!(name, "catalog returned no match — inserting zero-priced position");
            events.emit(OfferEvent::ResolutionNotice {
                name: name.to_string(),
                detail: "no catalog match, price must be set manually".to_string(),
            });
            zero_priced(name, menge.unwrap_or(1.0), einheit)
        }
        Err(err) => {
            warn!(name, error = %err, "extraction failed — inserting zero-priced position");
            events.emit(OfferEvent::ResolutionNotice {
                name: name.to_string(),
                detail: err.to_string(),
            });
            zero_priced(name, menge.unwrap_or(1.0), einheit)
        }
    }
}

/// Resolve an accepted guard suggestion.
pub async fn resolve_suggestion(
    extraction: &dyn ExtractionService,
    suggestion: &GuardSuggestion,
    events: &EventBus,
) -> RawPosition {
    let einheit = suggestion.einheit.as_deref().unwrap_or(DEFAULT_EINHEIT);
    resolve_named(
        extraction,
        &suggestion.name,
        suggestion.menge,
        einheit,
        events,
    )
    .await
}

/// Resolve every raw position of a finalized wizard run, in order.
/// Individual failures degrade to zero-priced lines; the run as a whole
/// always materializes.
pub async fn resolve_wizard_positions(
    extraction: &dyn ExtractionService,
    items: &[WizardPosition],
    events: &EventBus,
) -> Vec<RawPosition> {
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        resolved.push(
            resolve_named(
                extraction,
                &item.name,
                Some(item.menge),
                &item.einheit,
                events,
            )
            .await,
        );
    }
    resolved
}

fn zero_priced(name: &str, menge: f64, einheit: &str) -> RawPosition {
    RawPosition {
        name: name.to_string(),
        menge,
        einheit: einheit.to_string(),
        epreis: 0.0,
    }
}
