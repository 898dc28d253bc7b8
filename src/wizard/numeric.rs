//! Free-text quantity input for `number` questions.
//!
//! The wizard keeps number fields as plain text while the user types and
//! commits on an explicit confirm.  Commit coerces, it never validates:
//! whatever ends up unparsable becomes 0.0 and travels on, so a stray
//! keystroke can never wedge the wizard.

/// Coerce free text to a quantity.
///
/// German decimal commas are normalized ("2,5" -> 2.5).  Empty or
/// unparsable input coerces to 0.0.
pub fn coerce_quantity(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.replace(',', ".").parse::<f64>().unwrap_or(0.0)
}
