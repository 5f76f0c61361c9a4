use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};
use sdk::types::{Action, TriggerRequest};

// Hints are static strings: whatever a provider or the store put into the
// error payload must never leak into the operator-facing hint.
proptest! {
    #[test]
    fn test_error_user_hint_never_echoes_payload(error_str in "[a-zA-Z0-9_-]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::ClaimFailed(error_str.clone()),
            EngineError::UnknownProvider(error_str.clone()),
            EngineError::PhaseFailed { phase: "seo".to_string(), reason: error_str.clone() },
            EngineError::Network(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }

    #[test]
    fn test_trigger_request_keywords_survive_json(
        keywords in proptest::collection::vec("[a-z ]{1,24}", 0..6),
        site in "[a-z]{3,10}",
    ) {
        let mut req = TriggerRequest::new(Action::Create).with_scope(site.clone(), "en");
        req.keywords = keywords.clone();

        let json = serde_json::to_string(&req).unwrap();
        let parsed: TriggerRequest = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(parsed.keywords, keywords);
        prop_assert_eq!(parsed.site_id, Some(site));
    }
}
