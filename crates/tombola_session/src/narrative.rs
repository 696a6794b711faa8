//! # Narrative Service Boundary
//!
//! Resolution asks an external text-generation service to judge the event: a
//! short story and a reward magnitude. The service is slow, sometimes down and
//! free to answer with anything, so the boundary is strict:
//!
//! ```text
//! prompt ──▶ NarrativeService::judge ──▶ raw text ──▶ parse_verdict ──▶ Verdict
//!                  │ error / timeout                      │ malformed
//!                  └──────────────────┬───────────────────┘
//!                                     ▼
//!                               fallback verdict
//! ```
//!
//! Only a single JSON object with exactly `narrative` (string) and `reward`
//! (integer) is accepted. The narrative is cut at a word boundary to the
//! configured caps and the reward is clamped to `[0, reward_cap]`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use tombola_economy::{Catalog, ItemId, ParticipantId};

use crate::config::SessionKind;
use crate::error::NarrativeError;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_KEY_ENV: &str = "TOMBOLA_NARRATOR_KEY";

/// Longest error body kept in [`NarrativeError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Judges a finished event.
#[async_trait]
pub trait NarrativeService: Send + Sync {
    /// Returns the raw service answer for `prompt`.
    async fn judge(&self, prompt: &str) -> Result<String, NarrativeError>;
}

/// A parsed, capped verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    /// Story text, within the caps.
    pub narrative: String,
    /// Reward per participant, within `[0, reward_cap]`.
    pub reward: u64,
}

/// Caps applied by [`parse_verdict`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerdictLimits {
    /// Maximum narrative length in characters.
    pub max_chars: usize,
    /// Maximum narrative length in words.
    pub max_words: usize,
    /// Maximum reward.
    pub reward_cap: u64,
}

impl Default for VerdictLimits {
    fn default() -> Self {
        Self {
            max_chars: 600,
            max_words: 100,
            reward_cap: 1_000,
        }
    }
}

/// Parses a raw service answer against the verdict contract.
pub fn parse_verdict(raw: &str, limits: &VerdictLimits) -> Result<Verdict, NarrativeError> {
    let malformed = |msg: &str| NarrativeError::Malformed(msg.to_string());

    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| NarrativeError::Malformed(format!("not a JSON object: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(malformed("expected a JSON object"));
    };
    if fields.len() != 2 {
        return Err(NarrativeError::Malformed(format!(
            "expected exactly 2 fields, got {}",
            fields.len()
        )));
    }

    let narrative = fields
        .get("narrative")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("`narrative` must be a string"))?;

    let reward = match fields.get("reward") {
        Some(Value::Number(n)) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(value), _, _) => value,
            (None, Some(_), _) => 0,
            // Integers outside the 64-bit range arrive as floats.
            (None, None, Some(f)) => {
                whole_reward(f).ok_or_else(|| malformed("`reward` must be an integer"))?
            }
            _ => return Err(malformed("`reward` must be an integer")),
        },
        _ => return Err(malformed("`reward` must be an integer")),
    };

    let narrative = truncate_words(narrative, limits.max_chars, limits.max_words);
    if narrative.is_empty() {
        return Err(malformed("`narrative` is empty"));
    }

    Ok(Verdict {
        narrative,
        reward: reward.min(limits.reward_cap),
    })
}

/// Saturating conversion for whole-number rewards; `None` for fractions.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::float_cmp)]
fn whole_reward(value: f64) -> Option<u64> {
    if value.fract() != 0.0 {
        return None;
    }
    // `as` saturates at `u64::MAX`.
    Some(if value <= 0.0 { 0 } else { value as u64 })
}

/// Removes a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // The opening line may carry an info string such as `json`.
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

/// Keeps whole words up to both caps. A single over-long word is cut hard.
fn truncate_words(text: &str, max_chars: usize, max_words: usize) -> String {
    let mut out = String::new();
    let mut chars = 0;
    for word in text.split_whitespace().take(max_words) {
        let len = word.chars().count();
        let sep = usize::from(!out.is_empty());
        if chars + sep + len > max_chars {
            if out.is_empty() {
                out.extend(word.chars().take(max_chars));
            }
            break;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(word);
        chars += sep + len;
    }
    out
}

/// Builds the judging prompt from the event and everyone's current loadout.
#[must_use]
pub fn build_prompt(
    kind: SessionKind,
    theme: &str,
    loadouts: &[(ParticipantId, Vec<ItemId>)],
    catalog: &Catalog,
    limits: &VerdictLimits,
) -> String {
    let mut prompt = format!(
        "You narrate a cooperative {kind} called \"{theme}\". {} adventurers took part.\n",
        loadouts.len()
    );
    for (participant, items) in loadouts {
        let gear: Vec<String> = items
            .iter()
            .map(|id| match catalog.item(*id) {
                Some(item) => format!("{} ({})", item.name, item.rarity),
                None => format!("item {id}"),
            })
            .collect();
        let _ = writeln!(prompt, "- adventurer {participant} brings: {}", gear.join(", "));
    }
    let _ = write!(
        prompt,
        "Judge how well this party fared given their gear. Reply with only a JSON object \
         with exactly two fields: \"narrative\" (a story of at most {} words) and \"reward\" \
         (an integer from 0 to {}).",
        limits.max_words, limits.reward_cap
    );
    prompt
}

/// Generic story used when the service cannot be used.
#[must_use]
pub fn fallback_narrative(kind: SessionKind, theme: &str) -> String {
    match kind {
        SessionKind::Raid => format!(
            "The raid on {theme} ends in smoke and shouting. The party limps home and splits what they carried out."
        ),
        SessionKind::Expedition => format!(
            "The expedition returns from {theme} with dusty boots and full packs. Nobody agrees on what happened."
        ),
    }
}

/// Connection settings for [`HttpNarrator`], the `[narrator]` config section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// Environment variable holding the API key. Unset means no auth header.
    pub api_key_env: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_KEY_ENV.to_string(),
        }
    }
}

/// Narrative service over an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct HttpNarrator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpNarrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNarrator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("has_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpNarrator {
    /// Creates a narrator, reading the key from the configured environment variable.
    #[must_use]
    pub fn from_config(config: &NarratorConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::info!(var = %config.api_key_env, "narrator API key not set, sending unauthenticated requests");
        }
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl NarrativeService for HttpNarrator {
    async fn judge(&self, prompt: &str) -> Result<String, NarrativeError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NarrativeError::Timeout
            } else {
                NarrativeError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::Malformed(format!("unexpected response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| NarrativeError::Malformed("response has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tombola_economy::{CatalogItem, PoolConfig, Rarity, TierConfig};

    fn limits() -> VerdictLimits {
        VerdictLimits::default()
    }

    #[test]
    fn test_parse_plain_object() {
        let verdict = parse_verdict(r#"{"narrative": "They won.", "reward": 420}"#, &limits()).unwrap();
        assert_eq!(verdict.narrative, "They won.");
        assert_eq!(verdict.reward, 420);
    }

    #[test]
    fn test_parse_fenced_object() {
        let raw = "```json\n{\"narrative\": \"A close call.\", \"reward\": 150}\n```";
        let verdict = parse_verdict(raw, &limits()).unwrap();
        assert_eq!(verdict.reward, 150);
    }

    #[test]
    fn test_reward_is_clamped() {
        let high = parse_verdict(r#"{"narrative": "Glory.", "reward": 99999}"#, &limits()).unwrap();
        assert_eq!(high.reward, 1_000);
        let low = parse_verdict(r#"{"narrative": "Ouch.", "reward": -20}"#, &limits()).unwrap();
        assert_eq!(low.reward, 0);

        let huge =
            parse_verdict(r#"{"narrative": "Riches.", "reward": 100000000000000000000}"#, &limits()).unwrap();
        assert_eq!(huge.reward, 1_000);
        let deep =
            parse_verdict(r#"{"narrative": "Ruin.", "reward": -100000000000000000000}"#, &limits()).unwrap();
        assert_eq!(deep.reward, 0);
        let exponent = parse_verdict(r#"{"narrative": "Fine.", "reward": 2e2}"#, &limits()).unwrap();
        assert_eq!(exponent.reward, 200);
    }

    #[test]
    fn test_rejects_wrong_shapes() {
        let cases = [
            "the party did great, 500 coins",
            r#"{"narrative": "Hi"}"#,
            r#"{"narrative": "Hi", "reward": 5, "mood": "happy"}"#,
            r#"{"narrative": "Hi", "reward": 5.5}"#,
            r#"{"narrative": "Hi", "reward": "5"}"#,
            r#"{"story": "Hi", "reward": 5}"#,
            r#"{"narrative": "   ", "reward": 5}"#,
            r#"[{"narrative": "Hi", "reward": 5}]"#,
        ];
        for raw in cases {
            assert!(
                matches!(parse_verdict(raw, &limits()), Err(NarrativeError::Malformed(_))),
                "accepted: {raw}"
            );
        }
    }

    #[test]
    fn test_truncates_at_word_boundary() {
        let limits = VerdictLimits {
            max_chars: 12,
            max_words: 10,
            reward_cap: 1_000,
        };
        let verdict =
            parse_verdict(r#"{"narrative": "alpha beta gamma delta", "reward": 1}"#, &limits).unwrap();
        assert_eq!(verdict.narrative, "alpha beta");

        let limits = VerdictLimits {
            max_chars: 100,
            max_words: 3,
            reward_cap: 1_000,
        };
        let verdict =
            parse_verdict(r#"{"narrative": "one two three four five", "reward": 1}"#, &limits).unwrap();
        assert_eq!(verdict.narrative, "one two three");
    }

    #[test]
    fn test_single_long_word_is_cut() {
        assert_eq!(truncate_words("supercalifragilistic", 5, 10), "super");
    }

    #[test]
    fn test_prompt_names_gear() {
        let catalog = Catalog::from_parts(
            vec![PoolConfig {
                id: 1,
                name: "Standard".to_string(),
                items_per_draw: 1,
                min_guaranteed_tier: Rarity::Common,
                jackpot_probability: 0.0,
                jackpot_min_tier: Rarity::Common,
                tiers: vec![TierConfig {
                    rarity: Rarity::Common,
                    probability: 1.0,
                    display_name: "Common".to_string(),
                }],
            }],
            vec![CatalogItem {
                id: 7,
                name: "Rusty Spoon".to_string(),
                rarity: Rarity::Common,
                pool: 1,
            }],
        )
        .unwrap();

        let prompt = build_prompt(
            SessionKind::Raid,
            "Ember Keep",
            &[(ParticipantId(5), vec![7, 8])],
            &catalog,
            &limits(),
        );
        assert!(prompt.contains("raid called \"Ember Keep\""));
        assert!(prompt.contains("Rusty Spoon (common), item 8"));
        assert!(prompt.contains("from 0 to 1000"));
    }
}
