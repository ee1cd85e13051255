// tests/config_env.rs
use market_news_digest::config::ai::ENV_AI_CONFIG_PATH;
use market_news_digest::config::pipeline::ENV_DIGEST_CONFIG_PATH;
use market_news_digest::config::{AiConfig, PipelineConfig};
use std::{env, fs};

#[serial_test::serial]
#[test]
fn digest_config_uses_env_then_cwd_then_defaults() {
    // Isolate CWD so the repo's own config/ is not read.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_DIGEST_CONFIG_PATH);

    // 1) Nothing on disk → built-in defaults.
    let d = PipelineConfig::load_default().unwrap();
    assert_eq!(d.entities.len(), 4);
    assert_eq!(d.limits.scoring_batch, 15);
    assert_eq!(d.cache.topic_ttl_days, 10);

    // 2) ./config/digest.toml
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/digest.toml"),
        r#"
[[entities]]
name = "Alpha"
code = "1111"
"#,
    )
    .unwrap();
    let c = PipelineConfig::load_default().unwrap();
    assert_eq!(c.entities.len(), 1);
    assert_eq!(c.entities[0].code, "1111");

    // 3) Env path wins.
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "[limits]\nmax_clusters = 2\n").unwrap();
    env::set_var(ENV_DIGEST_CONFIG_PATH, p_env.display().to_string());
    let e = PipelineConfig::load_default().unwrap();
    assert_eq!(e.limits.max_clusters, 2);

    // 4) Env path to a missing file is an error, as is broken TOML.
    env::set_var(ENV_DIGEST_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(PipelineConfig::load_default().is_err());
    fs::write(&p_env, "limits = [").unwrap();
    env::set_var(ENV_DIGEST_CONFIG_PATH, p_env.display().to_string());
    assert!(PipelineConfig::load_default().is_err());

    env::remove_var(ENV_DIGEST_CONFIG_PATH);
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn ai_config_env_key_and_missing_file() {
    let tmp = tempfile::tempdir().unwrap();

    env::set_var(ENV_AI_CONFIG_PATH, tmp.path().join("absent.json").display().to_string());
    let d = AiConfig::load_default().unwrap();
    assert!(!d.enabled);

    let p = tmp.path().join("ai.json");
    fs::write(&p, r#"{"enabled": true, "provider": "openai", "api_key": "ENV"}"#).unwrap();
    env::set_var(ENV_AI_CONFIG_PATH, p.display().to_string());
    env::set_var("OPENAI_API_KEY", "sk-from-env");
    let c = AiConfig::load_default().unwrap();
    assert_eq!(c.api_key, "sk-from-env");

    env::remove_var("OPENAI_API_KEY");
    assert!(AiConfig::load_default().is_err());

    env::remove_var(ENV_AI_CONFIG_PATH);
}
