//! Metering Tests
//!
//! End-to-end tests across the public API: admission decisions, usage
//! accounting, pricing, statistics and snapshot persistence.
//!
//! Run: cargo nextest run --test metering_tests

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Local};
use keymeter::{
    ApiKeyPolicy, Metering, MeteringConfig, ModelPricing, PricingCatalog, QuotaManager,
    TokenCounts,
};
use tempfile::TempDir;

/// Route library logs to the test harness; `RUST_LOG=keymeter=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn date(offset_days: i64) -> String {
    (Local::now() + Duration::days(offset_days))
        .format("%Y-%m-%d")
        .to_string()
}

fn manager_with(policies: &[(&str, ApiKeyPolicy)]) -> Arc<QuotaManager> {
    let pricing = Arc::new(PricingCatalog::new());
    pricing.set("priced", ModelPricing::new(2.5, 10.0));
    let manager = QuotaManager::new(pricing);
    manager.load_policies(
        policies
            .iter()
            .map(|(k, p)| (k.to_string(), p.clone()))
            .collect(),
    );
    Arc::new(manager)
}

// =============================================================================
// Decision Engine
// =============================================================================

mod decision_tests {
    use super::*;

    #[test]
    fn test_unknown_key_always_allowed() {
        let m = manager_with(&[("other", ApiKeyPolicy::new().max_tokens(1))]);
        for model in ["priced", "anything", ""] {
            let result = m.check_quota("no-policy-key", model);
            assert!(result.allowed);
            assert!(result.error.is_none());
            assert!(result.remaining_tokens.is_none());
            assert!(result.remaining_cost_usd.is_none());
        }
    }

    #[test]
    fn test_date_only_expiry_is_end_of_day() {
        let m = manager_with(&[
            ("today", ApiKeyPolicy::new().expires_at(date(0))),
            ("last-year", ApiKeyPolicy::new().expires_at(date(-365))),
            ("next-year", ApiKeyPolicy::new().expires_at(date(365))),
        ]);

        assert!(m.check_quota("today", "priced").allowed);
        assert!(m.check_quota("next-year", "priced").allowed);

        let result = m.check_quota("last-year", "priced");
        assert!(!result.allowed);
        let err = result.error.unwrap();
        assert_eq!(err.code(), "api_key_expired");
        assert!(err.to_string().contains(&date(-365)));
    }

    #[test]
    fn test_allow_list_exact_match() {
        let m = manager_with(&[
            ("open", ApiKeyPolicy::new()),
            ("locked", ApiKeyPolicy::new().allowed_models(["gpt-5"])),
        ]);

        assert!(m.check_quota("open", "Gpt-5-Anything").allowed);
        assert!(m.check_quota("locked", "gpt-5").allowed);

        for near_miss in ["GPT-5", "gpt-5 ", "gpt-5-codex", "gpt"] {
            let err = m.check_quota("locked", near_miss).error.unwrap();
            assert_eq!(err.code(), "model_not_allowed");
            let details = err.details();
            assert_eq!(details["requested_model"], near_miss);
            assert_eq!(details["allowed_models"], serde_json::json!(["gpt-5"]));
        }
    }

    #[test]
    fn test_check_order() {
        // Every limit is violated; expiry is reported first, then model.
        let m = manager_with(&[
            (
                "everything",
                ApiKeyPolicy::new()
                    .expires_at(date(-2))
                    .allowed_models(["priced"])
                    .max_tokens(1)
                    .max_cost_usd(0.000001),
            ),
            (
                "budget",
                ApiKeyPolicy::new().max_tokens(1).max_cost_usd(0.000001),
            ),
        ]);
        m.update_usage("everything", "priced", TokenCounts::new(1000, 1000));
        m.update_usage("budget", "priced", TokenCounts::new(1000, 1000));

        assert_eq!(
            m.check_quota("everything", "other").error.unwrap().code(),
            "api_key_expired"
        );
        assert_eq!(
            m.check_quota("budget", "priced").error.unwrap().code(),
            "token_limit_exceeded"
        );
    }

    #[test]
    fn test_token_limit_reached_exactly() {
        let m = manager_with(&[("k", ApiKeyPolicy::new().max_tokens(1500))]);

        m.update_usage("k", "priced", TokenCounts::new(1000, 499));
        let result = m.check_quota("k", "priced");
        assert!(result.allowed);
        assert_eq!(result.remaining_tokens, Some(1));

        m.update_usage("k", "priced", TokenCounts::new(1, 0));
        let err = m.check_quota("k", "priced").error.unwrap();
        assert_eq!(err.to_string(), "Token limit exceeded. Used: 1500 / Limit: 1500");
    }

    #[test]
    fn test_cost_limit_payload() {
        let m = manager_with(&[("k", ApiKeyPolicy::new().max_cost_usd(0.005))]);
        m.update_usage("k", "priced", TokenCounts::new(1000, 500));

        let err = m.check_quota("k", "priced").error.unwrap();
        let payload = serde_json::to_value(err.to_payload()).unwrap();
        assert_eq!(payload["type"], "quota_exceeded");
        assert_eq!(payload["code"], "cost_limit_exceeded");
        assert_eq!(payload["message"], "Cost limit exceeded. Used: $0.01 / Limit: $0.01");
        assert!((payload["details"]["used_cost_usd"].as_f64().unwrap() - 0.0075).abs() < 1e-12);
        assert_eq!(payload["details"]["max_cost_usd"], 0.005);
    }

    #[test]
    fn test_policy_reload_is_atomic() {
        let m = manager_with(&[("a", ApiKeyPolicy::new().max_tokens(1))]);
        m.update_usage("a", "priced", TokenCounts::new(1, 0));
        assert!(!m.check_quota("a", "priced").allowed);

        m.load_policies(HashMap::from([(
            "b".to_string(),
            ApiKeyPolicy::new().max_tokens(1),
        )]));
        assert!(m.check_quota("a", "priced").allowed);
        assert_eq!(m.all_policies().len(), 1);
    }
}

// =============================================================================
// Usage Accounting
// =============================================================================

mod accounting_tests {
    use super::*;

    #[test]
    fn test_sequential_updates() {
        let m = manager_with(&[]);
        m.update_usage("k", "priced", TokenCounts::new(1000, 500));
        m.update_usage("k", "priced", TokenCounts::new(2000, 1000));

        let usage = m.get_usage("k").unwrap();
        assert_eq!(usage.total_tokens, 4500);
        assert_eq!(usage.total_requests, 2);
        assert!(usage.last_used_at >= usage.created_at);
    }

    #[test]
    fn test_concurrent_updates_lose_nothing() {
        let m = manager_with(&[]);
        let threads = 24u64;
        let per_thread = 50u64;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        m.update_usage("shared", "priced", TokenCounts::new(t, 1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let expected_tokens: u64 = (0..threads).map(|t| (t + 1) * per_thread).sum();
        let usage = m.get_usage("shared").unwrap();
        assert_eq!(usage.total_tokens, expected_tokens);
        assert_eq!(usage.total_requests, threads * per_thread);
    }

    #[test]
    fn test_admission_bills_once() {
        let m = manager_with(&[("k", ApiKeyPolicy::new().max_tokens(100))]);

        let admission = m.admit("k", "priced").unwrap();
        admission.complete(TokenCounts::new(60, 60));

        let err = m.admit("k", "priced").unwrap_err();
        assert_eq!(err.code(), "token_limit_exceeded");
        assert_eq!(m.get_usage("k").unwrap().total_requests, 1);
    }

    #[test]
    fn test_reset_usage_recreates_fresh_row() {
        let m = manager_with(&[]);
        let first = m.update_usage("k", "priced", TokenCounts::new(10, 10));
        m.reset_usage("k");
        assert!(m.get_usage("k").is_none());

        let second = m.update_usage("k", "priced", TokenCounts::new(1, 1));
        assert_eq!(second.total_tokens, 2);
        assert_eq!(second.total_requests, 1);
        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn test_quota_status_composes_reads() {
        let m = manager_with(&[(
            "sk-composed-status-01",
            ApiKeyPolicy::new()
                .name("team")
                .max_tokens(2000)
                .expires_at(date(30)),
        )]);
        m.update_usage("sk-composed-status-01", "priced", TokenCounts::new(400, 100));

        let status = m.quota_status("sk-composed-status-01");
        assert_eq!(status.api_key, "sk-compo...s-01");
        assert_eq!(status.remaining_tokens, Some(1500));
        assert_eq!(status.token_usage_percent, Some(25.0));
        assert!(status.remaining_cost_usd.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["policy"]["name"], "team");
        assert_eq!(json["policy"]["is_expired"], false);
        assert_eq!(json["usage"]["total_requests"], 1);
    }
}

// =============================================================================
// Pricing
// =============================================================================

mod pricing_tests {
    use super::*;

    #[test]
    fn test_linear_cost() {
        let catalog = PricingCatalog::new();
        catalog.set("m", ModelPricing::new(2.5, 10.0));
        catalog.set("m-cached", ModelPricing::with_cached(2.5, 10.0, 0.3));

        let base = catalog.calculate_cost("m", 1000, 500, 0);
        assert!((base - 0.0075).abs() < 1e-12);

        let cached = catalog.calculate_cost("m-cached", 1000, 500, 2000);
        assert!((cached - base - 0.0006).abs() < 1e-12);

        assert_eq!(catalog.calculate_cost("nope", 1_000_000, 1_000_000, 0), 0.0);
    }

    #[tokio::test]
    async fn test_file_beats_defaults_in_any_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pricing.json");
        std::fs::write(
            &path,
            r#"{"gpt-5": {"input_price_per_million": 0.5, "output_price_per_million": 1.0}}"#,
        )
        .unwrap();

        let file_first = PricingCatalog::new();
        file_first.load_from_file(&path).await.unwrap();
        file_first.set_defaults(keymeter::default_model_pricing());

        let defaults_first = PricingCatalog::with_defaults();
        defaults_first.load_from_file(&path).await.unwrap();

        let expected = Some(ModelPricing::new(0.5, 1.0));
        assert_eq!(file_first.get("gpt-5"), expected);
        assert_eq!(defaults_first.get("gpt-5"), expected);
        assert_eq!(file_first.all(), defaults_first.all());
    }
}

// =============================================================================
// Persistence
// =============================================================================

mod persistence_tests {
    use super::*;
    use keymeter::{RequestRecord, TokenStats};

    #[tokio::test]
    async fn test_restart_restores_both_ledgers() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let config = MeteringConfig::new(dir.path())
            .policy("sk-restart-test-0001", ApiKeyPolicy::new().max_tokens(10_000));

        let before = {
            let metering = Metering::start(config.clone()).await.unwrap();
            for _ in 0..3 {
                metering
                    .admit("sk-restart-test-0001", "gpt-5")
                    .unwrap()
                    .complete(TokenCounts::new(1000, 250).with_cached(400));
                metering.record_request(
                    RequestRecord::new("openai", "gpt-5").tokens(TokenStats::new(1000, 250)),
                );
            }
            metering.shutdown().await;
            (metering.quota().all_usage(), metering.stats().snapshot())
        };

        let metering = Metering::start(config).await.unwrap();
        assert_eq!(metering.quota().all_usage(), before.0);

        let stats = metering.stats().snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.apis, before.1.apis);
        assert_eq!(stats.requests_by_hour, before.1.requests_by_hour);

        let result = metering.quota().check_quota("sk-restart-test-0001", "gpt-5");
        assert_eq!(result.remaining_tokens, Some(10_000 - 3750));
        metering.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_does_not_block_startup() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("quota_usage.json"), b"not json").unwrap();

        let metering = Metering::start(MeteringConfig::new(dir.path())).await.unwrap();
        assert!(metering.quota().all_usage().is_empty());
        assert!(metering.quota_store().load().await.is_err());
        metering.shutdown().await;

        // The final save replaces the corrupt file with a valid snapshot.
        let text = std::fs::read_to_string(dir.path().join("quota_usage.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], 1);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let metering = Metering::start(MeteringConfig::new(dir.path())).await.unwrap();
        metering.quota_store().save().await.unwrap();
        metering.stats_store().save().await.unwrap();
        metering.shutdown().await;

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{:?}", names);
        assert!(names.contains(&"quota_usage.json".to_string()));
        assert!(names.contains(&"usage_stats.json".to_string()));
    }

    #[tokio::test]
    async fn test_lifecycle_idempotence() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let metering = Metering::start(MeteringConfig::new(dir.path())).await.unwrap();

        assert!(!metering.quota_store().start_autosave());
        assert!(metering.quota_store().stop_autosave().await);
        assert!(!metering.quota_store().stop_autosave().await);

        metering.shutdown().await;
        metering.shutdown().await;
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_tests {
    use super::*;

    #[tokio::test]
    async fn test_yaml_config_drives_metering() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("keymeter.yml");
        let data_dir = dir.path().join("state");
        std::fs::write(
            &config_path,
            format!(
                r#"
data-dir: {}
autosave-interval-secs: 120
api-key-policies:
  sk-yaml-config-0001:
    allowed_models: [gemini-2.5-pro]
"#,
                data_dir.display()
            ),
        )
        .unwrap();

        let config = MeteringConfig::from_file(&config_path).await.unwrap();
        config.validate().unwrap();

        let metering = Metering::start(config).await.unwrap();
        assert!(metering.admit("sk-yaml-config-0001", "gemini-2.5-pro").is_ok());
        let err = metering.admit("sk-yaml-config-0001", "gpt-5").unwrap_err();
        assert_eq!(err.http_status(), 403);
        metering.shutdown().await;

        assert!(data_dir.join("quota_usage.json").exists());
    }

    #[tokio::test]
    async fn test_zero_autosave_interval_from_env_is_rejected() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let config = MeteringConfig::new(dir.path())
            .apply_env_from(|key| {
                (key == "KEYMETER_AUTOSAVE_INTERVAL_SECS").then(|| "0".to_string())
            })
            .unwrap();

        let err = Metering::start(config).await.unwrap_err();
        assert!(!err.is_denial());
        assert!(err.to_string().contains("autosave-interval-secs"));
    }
}
