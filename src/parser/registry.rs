//! Formatter lookup by media type.

use std::collections::HashMap;
use std::sync::Arc;

use super::formatter::{
    AlternativeFormatter, AnyTypeFormatter, EncapsulatedFormatter, EncryptedFormatter,
    HeadersFormatter, HtmlFormatter, MixedFormatter, PgpEncryptedFormatter, Pkcs7Formatter,
    RelatedFormatter, SignedFormatter, TextPlainFormatter,
};
use super::formatter::BodyPartFormatter;

/// Wildcard for either half of a media type.
pub const ANY: &str = "*";

/// Multimap from `(type, subtype)` to formatters, tried in registration order.
#[derive(Default, Clone)]
pub struct FormatterRegistry {
    types: HashMap<String, HashMap<String, Vec<Arc<dyn BodyPartFormatter>>>>,
}

impl FormatterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in formatters for MIME, PGP/MIME and S/MIME.
    pub fn with_defaults() -> Self {
        let any: Arc<dyn BodyPartFormatter> = Arc::new(AnyTypeFormatter);
        let text: Arc<dyn BodyPartFormatter> = Arc::new(TextPlainFormatter);
        let pkcs7: Arc<dyn BodyPartFormatter> = Arc::new(Pkcs7Formatter);

        let mut registry = Self::new();
        registry.register("application", "octet-stream", Arc::clone(&any));
        registry.register("application", "pgp", Arc::clone(&text));
        registry.register("application", "pkcs7-mime", Arc::clone(&pkcs7));
        registry.register("application", "x-pkcs7-mime", pkcs7);
        registry.register("application", "pgp-encrypted", Arc::new(PgpEncryptedFormatter));
        registry.register("application", ANY, Arc::clone(&any));

        registry.register("text", "html", Arc::new(HtmlFormatter));
        registry.register("text", "rtf", Arc::clone(&any));
        registry.register("text", "plain", Arc::clone(&text));
        registry.register("text", "rfc822-headers", Arc::new(HeadersFormatter));
        registry.register("text", ANY, text);

        registry.register("image", ANY, Arc::clone(&any));

        registry.register("message", "rfc822", Arc::new(EncapsulatedFormatter));
        registry.register("message", ANY, Arc::clone(&any));

        registry.register("multipart", "alternative", Arc::new(AlternativeFormatter));
        registry.register("multipart", "encrypted", Arc::new(EncryptedFormatter));
        registry.register("multipart", "signed", Arc::new(SignedFormatter));
        registry.register("multipart", "related", Arc::new(RelatedFormatter));
        registry.register("multipart", ANY, Arc::new(MixedFormatter));
        registry.register(ANY, ANY, any);
        registry
    }

    /// Add `formatter` after any already registered for the same pair.
    pub fn register(&mut self, media_type: &str, subtype: &str, formatter: Arc<dyn BodyPartFormatter>) {
        tracing::trace!(media_type, subtype, formatter = formatter.name(), "Registering formatter");
        self.types
            .entry(media_type.to_ascii_lowercase())
            .or_default()
            .entry(subtype.to_ascii_lowercase())
            .or_default()
            .push(formatter);
    }

    /// Formatters for the exact pair. A media type with no registrations at
    /// all is looked up under the `*` type instead.
    pub fn lookup(&self, media_type: &str, subtype: &str) -> &[Arc<dyn BodyPartFormatter>] {
        let subtypes = self
            .types
            .get(&media_type.to_ascii_lowercase())
            .or_else(|| self.types.get(ANY));
        subtypes
            .and_then(|s| s.get(&subtype.to_ascii_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .types
            .iter()
            .flat_map(|(t, subs)| subs.keys().map(move |s| format!("{t}/{s}")))
            .collect();
        keys.sort();
        f.debug_struct("FormatterRegistry").field("types", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[Arc<dyn BodyPartFormatter>]) -> Vec<&'static str> {
        list.iter().map(|f| f.name()).collect()
    }

    #[test]
    fn test_exact_lookup_is_case_insensitive() {
        let registry = FormatterRegistry::with_defaults();
        assert_eq!(names(registry.lookup("TEXT", "Plain")), vec!["text/plain"]);
        assert_eq!(names(registry.lookup("multipart", "signed")), vec!["multipart/signed"]);
    }

    #[test]
    fn test_wildcard_tiers() {
        let registry = FormatterRegistry::with_defaults();
        // No exact entry for text/x-diff; the caller retries with "*"
        assert!(registry.lookup("text", "x-diff").is_empty());
        assert_eq!(names(registry.lookup("text", ANY)), vec!["text/plain"]);
        // Unknown media type falls back to the "*" type
        assert_eq!(names(registry.lookup("model", ANY)), vec!["any"]);
    }

    #[test]
    fn test_register_keeps_order() {
        let mut registry = FormatterRegistry::new();
        registry.register("text", "plain", Arc::new(HtmlFormatter));
        registry.register("text", "plain", Arc::new(TextPlainFormatter));
        assert_eq!(
            names(registry.lookup("text", "plain")),
            vec!["text/html", "text/plain"]
        );
        assert!(registry.lookup("image", "png").is_empty());
    }
}
