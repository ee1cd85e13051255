//! Classifier adapter: provider abstraction + response cache + daily limit.
//!
//! Every stage that consults the language model goes through `LlmClient`.
//! A `None` completion means "no usable answer"; callers fall back locally.
//! Cached answers expire after `DEFAULT_RESPONSE_TTL` and only answers the
//! calling stage accepts are written to the cache.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::AiConfig;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Decides whether a completion is good enough to be reused.
pub type Accept<'a> = dyn Fn(&str) -> bool + Send + Sync + 'a;

/// Cached responses older than this are ignored.
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub trait LlmClient: Send + Sync {
    /// Send one system+user prompt pair; returns the raw completion text.
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    /// Like `complete`, but an answer is only cached when `accept` approves
    /// it. The answer is returned either way.
    fn complete_checked<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        _accept: &'a Accept<'a>,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        self.complete(system, user)
    }

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynLlmClient = Arc<dyn LlmClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a mock that answers `{}` (every stage falls back).
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the real provider wrapped with response cache + daily limit.
pub fn build_client_from_config(config: &AiConfig) -> DynLlmClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockProvider::fixed("{}"));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(&config.api_key, &config.model) {
            Ok(provider) => Arc::new(BudgetedClient::new(
                provider,
                default_cache_dir(),
                config.daily_limit,
            )),
            Err(e) => {
                warn!(target: "ai", error = ?e, "openai provider unavailable; classifier disabled");
                Arc::new(DisabledClient)
            }
        },
        other => {
            warn!(target: "ai", provider = other, "unknown provider; classifier disabled");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// OpenAI provider (Chat Completions API, JSON object mode).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("empty api key");
        }
        let http = reqwest::Client::builder()
            .user_agent("market-news-digest/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: 0.2,
                max_tokens: 1500,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = match self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(target: "ai", error = %e, "openai request failed");
                    return None;
                }
            };

            if !resp.status().is_success() {
                warn!(target: "ai", status = %resp.status(), "openai non-success status");
                return None;
            }
            let body: Resp = resp.json().await.ok()?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Returns `None` always; used when the classifier is disabled.
pub struct DisabledClient;

impl LlmClient for DisabledClient {
    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

type Responder = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Scripted provider for tests and local runs.
pub struct MockProvider {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same text.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Some(text.clone()))
    }

    /// Sleeps before answering; used to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            (self.responder)(system, user)
        })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

impl LlmClient for MockProvider {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        self.fetch(system, user)
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Budgeted client wrapper (response cache + daily limit)
// ------------------------------------------------------------

pub struct BudgetedClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    response_ttl: Duration,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> BudgetedClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(target: "ai", error = %e, dir = %cache_dir.display(), "cannot create ai cache dir");
        }
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            response_ttl: DEFAULT_RESPONSE_TTL,
            counter,
        }
    }

    pub fn with_response_ttl(mut self, ttl: Duration) -> Self {
        self.response_ttl = ttl;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Real calls made today.
    pub fn used_today(&self) -> u32 {
        let g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }

    async fn complete_impl(
        &self,
        system: &str,
        user: &str,
        accept: Option<&Accept<'_>>,
    ) -> Option<String> {
        // 1) Cache lookup; hits are free.
        let key = cache_key(system, user);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key, self.response_ttl) {
            if accept.map_or(true, |ok| ok(hit.as_str())) {
                debug!(target: "ai", key = %key, "classifier cache hit");
                return Some(hit);
            }
        }

        // 2) Daily limit: reserve a slot before the call so concurrent
        //    callers cannot all pass the check.
        if !self.reserve_slot() {
            warn!(target: "ai", limit = self.daily_limit_max, "daily classifier limit reached");
            return None;
        }

        // 3) Real call.
        let Some(fresh) = self.inner.fetch(system, user).await else {
            self.release_slot();
            return None;
        };
        if accept.map_or(true, |ok| ok(fresh.as_str())) {
            if let Err(e) = write_cache_file(&self.cache_dir, &key, &fresh) {
                debug!(target: "ai", error = %e, "classifier cache write failed");
            }
        } else {
            debug!(target: "ai", key = %key, "answer rejected by caller; not cached");
        }
        Some(fresh)
    }

    fn reserve_slot(&self) -> bool {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            g.reset_to_today();
        }
        if g.count >= self.daily_limit_max {
            return false;
        }
        g.count += 1;
        let _ = save_daily_counter(&self.cache_dir, &g);
        true
    }

    fn release_slot(&self) {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.count = g.count.saturating_sub(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
    }
}

impl<P: Provider> LlmClient for BudgetedClient<P> {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(self.complete_impl(system, user, None))
    }
    fn complete_checked<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        accept: &'a Accept<'a>,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(self.complete_impl(system, user, Some(accept)))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

pub fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/ai")
}

/// Deletes every cached response under `dir`. The daily counter is kept so a
/// clear cannot be used to reset the budget. Returns the number of files removed.
pub fn clear_response_cache(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_response = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".txt") || n.ends_with(".txt.tmp"));
        if is_response {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn cache_key(system: &str, user: &str) -> String {
    let mut h = Sha256::new();
    h.update(system.as_bytes());
    h.update([0u8]);
    h.update(user.as_bytes());
    let digest = h.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.txt"))
}

fn read_cache_file(dir: &Path, key: &str, ttl: Duration) -> Option<String> {
    let path = cache_path(dir, key);
    let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age > ttl {
        return None;
    }
    fs::read_to_string(path).ok().filter(|s| !s.is_empty())
}

fn write_cache_file(dir: &Path, key: &str, value: &str) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("txt.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(value.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}
impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}
impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}
