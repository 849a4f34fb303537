//! Legacy export shapes.
//!
//! Older exporters nested each record under a platform-specific key
//! (`tweet`, `episode`, `listening`, `post`, `reading`). The matchers in
//! [`SHAPES`] are tried in order and the first whose predicate accepts the
//! record builds the activity. A listening record carries its episode and
//! resolves to consume. A record holding a `post` is a blog post even when
//! it also has `reading`; only post-less reading records are consume.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::codec::{RecordError, game_signature_value, opt_str, seconds_value, timestamp_field};
use super::{Activity, ActivityType};

type Object = Map<String, Value>;

/// One recognised legacy shape.
pub struct LegacyShape {
    /// Short name used in logs.
    pub name: &'static str,
    matches: fn(&Object) -> bool,
    build: fn(&Object) -> Result<Activity, RecordError>,
}

/// Matchers in priority order.
pub const SHAPES: [LegacyShape; 6] = [
    LegacyShape {
        name: "tweet",
        matches: has_tweet,
        build: tweet,
    },
    LegacyShape {
        name: "listening",
        matches: has_listening,
        build: listening,
    },
    LegacyShape {
        name: "episode",
        matches: has_episode,
        build: episode,
    },
    LegacyShape {
        name: "post",
        matches: has_post,
        build: post,
    },
    LegacyShape {
        name: "reading",
        matches: has_reading,
        build: reading,
    },
    LegacyShape {
        name: "blog_source",
        matches: is_blog_source,
        build: reading,
    },
];

/// Name of the first shape that accepts `map`.
#[must_use]
pub fn shape_of(map: &Object) -> Option<&'static str> {
    SHAPES.iter().find(|s| (s.matches)(map)).map(|s| s.name)
}

/// Build an activity from the first matching legacy shape.
///
/// # Errors
///
/// [`RecordError::UnrecognizedShape`] when no shape matches, otherwise
/// whatever the matched builder rejects (usually a missing timestamp).
pub fn parse_legacy(map: &Object) -> Result<Activity, RecordError> {
    let shape = SHAPES
        .iter()
        .find(|s| (s.matches)(map))
        .ok_or(RecordError::UnrecognizedShape)?;
    (shape.build)(map)
}

fn has_tweet(map: &Object) -> bool {
    map.contains_key("tweet")
}

fn has_listening(map: &Object) -> bool {
    map.contains_key("listening")
}

fn has_episode(map: &Object) -> bool {
    map.contains_key("episode")
}

fn has_reading(map: &Object) -> bool {
    map.contains_key("reading")
}

fn has_post(map: &Object) -> bool {
    map.contains_key("post")
}

fn is_blog_source(map: &Object) -> bool {
    map.get("source_type").and_then(Value::as_str) == Some("blog")
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn tweet(map: &Object) -> Result<Activity, RecordError> {
    let tweet = obj(map, "tweet");
    let timestamp = stamp(map, tweet, "created_at")?;
    let metrics = obj(map, "metrics");
    let tweet_id = id_text(map.get("id")).or_else(|| id_text(get(tweet, "id")));

    let mut raw = BTreeMap::new();
    put(&mut raw, "tweet_id", tweet_id.clone().map(Value::String).as_ref());
    put(&mut raw, "username", map.get("username"));
    put(&mut raw, "author_id", map.get("author_id"));
    put(&mut raw, "tweet_type", get(tweet, "type"));
    for key in ["likes", "retweets", "replies"] {
        let count = get(metrics, key).cloned().unwrap_or_else(|| Value::from(0));
        raw.insert(key.to_string(), count);
    }

    let mut builder = Activity::builder(timestamp, "twitter", ActivityType::Create)
        .content(text(tweet, "text").unwrap_or_default())
        .raw_data(raw);
    if let Some(url) = text(tweet, "url") {
        builder = builder.url(url);
    }
    if let Some(id) = tweet_id {
        builder = builder.id(format!("twitter_{id}"));
    }
    if let Some(signature) = get(obj(map, "analysis"), "game_signature").and_then(game_signature_value) {
        builder = builder.game_signature(signature);
    }
    if let Some(score) = map.get("quality_score").and_then(Value::as_f64) {
        builder = builder.quality_score(score);
    }
    Ok(builder.build())
}

fn episode(map: &Object) -> Result<Activity, RecordError> {
    let episode = obj(map, "episode");
    let timestamp = stamp(map, episode, "publish_date")?;

    let mut raw = BTreeMap::new();
    put(&mut raw, "episode_id", get(episode, "episode_id"));
    put(&mut raw, "guid", get(episode, "guid"));
    put(&mut raw, "id", map.get("id"));

    let mut builder =
        Activity::builder(timestamp, "podcast", ActivityType::Create).raw_data(raw);
    if let Some(title) = text(episode, "title") {
        builder = builder.title(title);
    }
    if let Some(description) = text(episode, "description") {
        builder = builder.content(description);
    }
    if let Some(url) = text(episode, "episode_url") {
        builder = builder.url(url);
    }
    if let Some(seconds) = get(episode, "duration_seconds").and_then(seconds_value) {
        builder = builder.duration_seconds(seconds);
    }
    Ok(builder.build())
}

fn listening(map: &Object) -> Result<Activity, RecordError> {
    let episode = obj(map, "episode");
    let listening = obj(map, "listening");
    let podcast = obj(map, "podcast");
    let timestamp = stamp(map, listening, "end_time")?;

    let mut raw = BTreeMap::new();
    put(&mut raw, "podcast_title", get(podcast, "title"));
    put(&mut raw, "show_id", get(podcast, "show_id"));
    put(&mut raw, "episode_id", get(episode, "episode_id"));
    put(&mut raw, "completion_percentage", get(listening, "completion_percentage"));
    put(&mut raw, "playback_speed", get(listening, "playback_speed"));
    put(&mut raw, "id", map.get("id"));

    let mut builder =
        Activity::builder(timestamp, "podcast", ActivityType::Consume).raw_data(raw);
    if let Some(title) = text(episode, "title") {
        builder = builder.title(title);
    }
    if let Some(url) = text(episode, "episode_url") {
        builder = builder.url(url);
    }
    let seconds = get(listening, "duration_seconds")
        .and_then(seconds_value)
        .filter(|s| *s > 0)
        .or_else(|| get(episode, "duration_seconds").and_then(seconds_value));
    if let Some(seconds) = seconds {
        builder = builder.duration_seconds(seconds);
    }
    Ok(builder.build())
}

fn post(map: &Object) -> Result<Activity, RecordError> {
    let post = obj(map, "post");
    let body = obj(map, "content");
    let timestamp = stamp(map, post, "publish_date")?;

    let mut raw = BTreeMap::new();
    put(&mut raw, "slug", get(post, "slug"));
    put(&mut raw, "word_count", get(post, "word_count"));
    raw.insert(
        "categories".to_string(),
        get(post, "categories")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    );
    put(&mut raw, "id", map.get("id"));

    let mut builder = Activity::builder(timestamp, "blog", ActivityType::Create).raw_data(raw);
    if let Some(title) = text(post, "title") {
        builder = builder.title(title);
    }
    let content = text(body, "plain_text")
        .filter(|s| !s.is_empty())
        .or_else(|| text(body, "excerpt").filter(|s| !s.is_empty()));
    if let Some(content) = content {
        builder = builder.content(content);
    }
    if let Some(url) = text(post, "url") {
        builder = builder.url(url);
    }
    Ok(builder.build())
}

fn reading(map: &Object) -> Result<Activity, RecordError> {
    let reading = obj(map, "reading");
    let post = obj(map, "post");
    let timestamp = stamp(map, reading, "end_time")?;

    let mut raw = BTreeMap::new();
    put(&mut raw, "completion_percentage", get(reading, "completion_percentage"));
    put(&mut raw, "id", map.get("id"));

    let mut builder = Activity::builder(timestamp, "blog", ActivityType::Consume).raw_data(raw);
    if let Some(title) = text(post, "title") {
        builder = builder.title(title);
    }
    if let Some(url) = text(post, "url") {
        builder = builder.url(url);
    }
    if let Some(seconds) = get(reading, "duration_seconds").and_then(seconds_value) {
        builder = builder.duration_seconds(seconds);
    }
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn obj<'a>(map: &'a Object, key: &str) -> Option<&'a Object> {
    map.get(key).and_then(Value::as_object)
}

fn get<'a>(obj: Option<&'a Object>, key: &str) -> Option<&'a Value> {
    obj.and_then(|o| o.get(key))
}

fn text<'a>(obj: Option<&'a Object>, key: &str) -> Option<&'a str> {
    obj.and_then(|o| opt_str(o, key))
}

/// Ids were written as strings by some exporters and numbers by others.
fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Top-level `timestamp` when present and non-empty, else the nested key.
fn stamp(map: &Object, nested: Option<&Object>, key: &str) -> Result<DateTime<Utc>, RecordError> {
    let top = map
        .get("timestamp")
        .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()));
    timestamp_field(top.or_else(|| get(nested, key)))
}

fn put(raw: &mut BTreeMap<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(value) = value.filter(|v| !v.is_null()) {
        raw.insert(key.to_string(), value.clone());
    }
}
