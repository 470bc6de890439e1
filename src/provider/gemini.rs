use crate::catalog::CategoryKey;
use crate::catalog::content::{ChallengeContent, FortuneContent, HealthContent};
use crate::config::Config;
use crate::net::{build_client, extract_json_block, run_blocking};
use crate::provider::{ContentParams, ContentProvider};
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use url::form_urlencoded::byte_serialize;

pub const API_KEY_ENV: &str = "TODAYS_CHALLENGE_GEMINI_API_KEY";

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

/// Challenge content generated through the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    model: String,
    image_model: String,
    images_enabled: bool,
    timeout_seconds: u64,
}

impl GeminiProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = resolve_api_key(config).with_context(|| {
            format!(
                "Gemini API key is missing. Set `TodaysChallenge config set gemini.api_key <KEY>` or `{API_KEY_ENV}`."
            )
        })?;

        Ok(Self {
            api_key,
            base_url: config.gemini_api_base_url.clone(),
            model: config.gemini_model.clone(),
            image_model: config.gemini_image_model.clone(),
            images_enabled: config.gemini_images_enabled,
            timeout_seconds: config.gemini_timeout_seconds,
        })
    }

    pub fn test_connection(&self) -> Result<String> {
        self.generate_text(
            "Reply with exactly one short Korean sentence confirming the API connection works.",
            None,
        )
    }

    fn fortune(&self, date: NaiveDate, params: &ContentParams) -> Result<ChallengeContent> {
        let birth_date = params
            .birth_date
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .context("Birth date is required for fortune content")?;

        let prompt = format!(
            "{} 기준, 생년월일이 {}인 사람의 오늘의 총운과 금전운을 합해서 150자 내외로 재미있고 긍정적으로 설명해주세요.",
            date.format("%Y-%m-%d"),
            birth_date
        );

        let text = self.generate_text(&prompt, None)?;
        Ok(ChallengeContent::Fortune(FortuneContent { text }))
    }

    fn structured(&self, category: CategoryKey, date: NaiveDate) -> Result<ChallengeContent> {
        let prompt = prompt_for(category, date);
        let reply = self.generate_text(&prompt, Some(schema_for(category)))?;
        let value: Value = serde_json::from_str(&extract_json_block(&reply))
            .with_context(|| format!("Failed to parse Gemini JSON payload. content: {reply}"))?;

        ChallengeContent::decode(category, value).map_err(anyhow::Error::from)
    }

    fn attach_step_images(&self, health: &mut HealthContent) {
        for step in &mut health.steps {
            let generated = if self.images_enabled && !step.image_prompt.trim().is_empty() {
                self.generate_image(&step.image_prompt)
                    .map_err(|error| {
                        warn!(error = %error, "step image generation failed, using placeholder");
                        error
                    })
                    .ok()
            } else {
                None
            };

            step.image_url = Some(generated.unwrap_or_else(|| fallback_image_url(&step.image_prompt)));
        }
    }

    fn generate_text(&self, prompt: &str, schema: Option<Value>) -> Result<String> {
        let generation_config = match schema {
            Some(schema) => json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }),
            None => json!({}),
        };

        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });

        let reply = self.post(&format!("models/{}:generateContent", self.model), body)?;
        reply_text(&reply)
    }

    fn generate_image(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "instances": [{"prompt": prompt}],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": "1:1",
                "outputOptions": {"mimeType": "image/jpeg"}
            }
        });

        let reply = self.post(&format!("models/{}:predict", self.image_model), body)?;
        let parsed: PredictResponse = serde_json::from_str(&reply)
            .with_context(|| format!("Failed to parse image response: {reply}"))?;

        parsed
            .predictions
            .into_iter()
            .find_map(|prediction| {
                let bytes = prediction.bytes_base64_encoded?;
                let mime = prediction
                    .mime_type
                    .unwrap_or_else(|| "image/jpeg".to_string());
                Some(format!("data:{mime};base64,{bytes}"))
            })
            .ok_or_else(|| anyhow!("Image response did not include image bytes"))
    }

    fn post(&self, path: &str, body: Value) -> Result<String> {
        let endpoint = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let api_key = self.api_key.clone();
        let timeout_seconds = self.timeout_seconds;

        run_blocking(move || post_blocking(&endpoint, &api_key, timeout_seconds, &body))
    }
}

impl ContentProvider for GeminiProvider {
    fn generate(
        &self,
        category: CategoryKey,
        date: NaiveDate,
        params: &ContentParams,
    ) -> Result<ChallengeContent> {
        info!(category = %category, date = %date, "generating challenge content");

        let content = match category {
            CategoryKey::Fortune => self.fortune(date, params)?,
            CategoryKey::Health => match self.structured(category, date)? {
                ChallengeContent::Health(mut health) => {
                    self.attach_step_images(&mut health);
                    ChallengeContent::Health(health)
                }
                other => other,
            },
            _ => self.structured(category, date)?,
        };

        Ok(content)
    }
}

pub fn has_api_key(config: &Config) -> bool {
    resolve_api_key(config).is_some()
}

fn resolve_api_key(config: &Config) -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            config
                .gemini_api_key
                .clone()
                .filter(|value| !value.trim().is_empty())
        })
}

pub fn fallback_image_url(prompt: &str) -> String {
    let seed = byte_serialize(prompt.as_bytes()).collect::<String>();
    format!("https://picsum.photos/seed/{seed}/512/512")
}

fn post_blocking(endpoint: &str, api_key: &str, timeout_seconds: u64, body: &Value) -> Result<String> {
    if api_key.trim().is_empty() {
        bail!("Gemini API key is empty");
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("x-goog-api-key"),
        HeaderValue::from_str(api_key).context("Failed to build API key header")?,
    );

    let client = build_client(timeout_seconds, headers)?;
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .context("Gemini API request failed")?;

    let status = response.status();
    let text = response
        .text()
        .context("Failed to read Gemini response body")?;

    if !status.is_success() {
        bail!("Gemini API error {}: {}", status, text);
    }

    Ok(text)
}

fn reply_text(body: &str) -> Result<String> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse Gemini response: {body}"))?;

    parsed
        .candidates
        .into_iter()
        .find_map(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("Gemini response did not include text"))
}

fn prompt_for(category: CategoryKey, date: NaiveDate) -> String {
    let date = date.format("%Y-%m-%d");

    match category {
        CategoryKey::Fortune => format!("{date} 기준 오늘의 운세를 150자 내외로 설명해주세요."),
        CategoryKey::Economics => format!(
            "오늘은 {date} 입니다. 오늘 날짜에 해당하는 최신 경제 금융 용어(예: 부동산, ETF, 채권 관련) 하나를 선정하고, 일반인도 쉽게 이해할 수 있도록 200자 내외로 설명해주세요."
        ),
        CategoryKey::Health => format!(
            "오늘은 {date} 입니다. 오늘 날짜에 해당하는, 현대인을 위한 간단한 스트레칭이나 운동(예: 거북목, 라운드숄더 교정) 하나를 선정해주세요. 운동 이름과, 운동 방법을 3단계로 나누어 설명해주세요. 각 단계는 50자 내외의 간단한 설명과, 해당 동작을 잘 보여주는 이미지 생성용 영문 프롬프트(imagePrompt)를 포함해야 합니다. imagePrompt는 \"A minimalist line art drawing of a person doing [action], simple background, instructional style\" 형식이어야 합니다."
        ),
        CategoryKey::Quiz => format!(
            "오늘은 {date} 입니다. 오늘 날짜에 해당하는 상식, 역사, 과학 분야의 재미있는 객관식 퀴즈를 하나 만들어주세요. 질문, 4개의 보기(options), 정답(answer), 그리고 100자 내외의 간단한 해설(explanation)을 포함해야 합니다. 정답은 보기 중 하나와 정확히 같아야 합니다."
        ),
        CategoryKey::Conversation => format!(
            "오늘은 {date} 입니다. 여행 상황(공항, 식당, 쇼핑 등)에서 유용한 같은 의미의 영어 표현과 일본어 표현을 하나씩 선정해주세요. 각각 원문(phrase), 한국어 번역(translation), 50자 내외의 사용 상황 설명(context)을 포함하고, 일본어에는 한글 발음(pronunciation)도 포함해주세요."
        ),
    }
}

fn schema_for(category: CategoryKey) -> Value {
    let phrase = json!({
        "type": "OBJECT",
        "properties": {
            "phrase": {"type": "STRING", "description": "회화 문장"},
            "translation": {"type": "STRING", "description": "한국어 번역"},
            "context": {"type": "STRING", "description": "사용 상황 설명"},
            "pronunciation": {"type": "STRING", "description": "한글 발음"}
        },
        "required": ["phrase", "translation", "context"]
    });

    match category {
        CategoryKey::Fortune => json!({
            "type": "OBJECT",
            "properties": {"text": {"type": "STRING", "description": "오늘의 운세"}},
            "required": ["text"]
        }),
        CategoryKey::Economics => json!({
            "type": "OBJECT",
            "properties": {
                "term": {"type": "STRING", "description": "경제 용어"},
                "description": {"type": "STRING", "description": "용어에 대한 쉬운 설명"}
            },
            "required": ["term", "description"]
        }),
        CategoryKey::Health => json!({
            "type": "OBJECT",
            "properties": {
                "title": {"type": "STRING", "description": "운동 이름"},
                "steps": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "description": {"type": "STRING", "description": "단계별 운동 설명"},
                            "imagePrompt": {"type": "STRING", "description": "이미지 생성을 위한 영문 프롬프트"}
                        },
                        "required": ["description", "imagePrompt"]
                    }
                }
            },
            "required": ["title", "steps"]
        }),
        CategoryKey::Quiz => json!({
            "type": "OBJECT",
            "properties": {
                "question": {"type": "STRING", "description": "퀴즈 질문"},
                "options": {"type": "ARRAY", "items": {"type": "STRING"}, "description": "4개의 보기"},
                "answer": {"type": "STRING", "description": "정답"},
                "explanation": {"type": "STRING", "description": "정답에 대한 해설"},
                "type": {"type": "STRING", "enum": ["multiple-choice"], "description": "퀴즈 타입"}
            },
            "required": ["question", "options", "answer", "explanation", "type"]
        }),
        CategoryKey::Conversation => json!({
            "type": "OBJECT",
            "properties": {"english": phrase.clone(), "japanese": phrase},
            "required": ["english", "japanese"]
        }),
    }
}
