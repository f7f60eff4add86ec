//! Message Translator (spec.md §4.3): segment-by-segment rewriting between
//! the two platforms' message models. Unrecognized kinds pass through as
//! a `[kind]` text marker rather than being dropped silently.

use std::sync::Arc;

use bridge_protocol::{segment::kind, Platform, Segment};
use bridge_store::Store;
use chrono::Utc;
use tracing::debug;

use bridge_media::MediaEngine;

use crate::conn::PeerSender;

pub struct TranslateContext {
    pub source_platform: Platform,
    pub target_platform: Platform,
    pub store: Arc<Store>,
    pub media: Arc<MediaEngine>,
    pub enable_miniapp_parsing: bool,
    pub mention_refresh_interval_secs: i64,
    /// The source platform's own peer handle, used to resolve a bare
    /// `file_id` to a fetchable URL when a segment carries no URL of its
    /// own (spec.md §4.3: "file ... if missing, resolve via platform
    /// API"). `None` in contexts that never need it (e.g. retry replay,
    /// which forwards already-resolved segments).
    pub source_peer: Option<Arc<dyn PeerSender>>,
}

/// Translates a source `Message` into the target platform's segment form.
/// Never fails: degrade to a text marker rather than drop a segment the
/// translator doesn't recognize.
pub async fn translate(ctx: &TranslateContext, segments: &[Segment]) -> Vec<Segment> {
    let image_count = segments.iter().filter(|s| s.is(kind::IMAGE)).count();
    let mut out = Vec::with_capacity(segments.len() + 1);
    if image_count >= 2 {
        out.push(Segment::text(format!("\n📸 共{image_count}张图片：\n")));
    }
    let mut image_index = 0usize;

    for seg in segments {
        match seg.kind.as_str() {
            k if k == kind::TEXT => {
                if let Some(text) = seg.get("text") {
                    out.push(Segment::text(text));
                }
            }
            k if k == kind::IMAGE => {
                image_index += 1;
                if image_count >= 2 {
                    out.push(Segment::text(format!("{image_index}. ")));
                }
                out.push(translate_image(ctx, seg).await);
            }
            k if k == kind::VOICE => {
                if let Some(url) = seg.get("url") {
                    out.push(Segment::new(kind::VOICE).with("url", url));
                }
            }
            k if k == kind::VIDEO => {
                if let Some(url) = seg.get("url") {
                    out.push(Segment::new(kind::VIDEO).with("url", url));
                }
            }
            k if k == kind::FILE => out.push(translate_file(ctx, seg).await),
            k if k == kind::FACE => {
                let id = seg.get("id").unwrap_or("?");
                out.push(Segment::text(format!("[face:{id}]")));
            }
            k if k == kind::MENTION => out.push(translate_mention(ctx, seg).await),
            k if k == kind::REPLY => {
                if let Some(resolved) = resolve_reply(ctx, seg).await {
                    out.push(resolved);
                }
            }
            k if k == kind::FORWARD => out.push(translate_forward_stub(seg)),
            k if k == kind::NODE => out.push(translate_node(seg)),
            k if k == kind::CARD || k == kind::MUSIC || k == kind::SHARE => {
                if ctx.enable_miniapp_parsing {
                    out.push(translate_card(seg));
                } else {
                    out.push(Segment::text(format!("[{}]", seg.kind)));
                }
            }
            other => {
                debug!(kind = other, "passing unrecognized segment through as a text marker");
                out.push(Segment::text(format!("[{other}]")));
            }
        }
    }
    out
}

async fn translate_image(ctx: &TranslateContext, seg: &Segment) -> Segment {
    let resolved = match seg.get("url") {
        Some(url) => Some(url.to_string()),
        // Platform B's photo segments carry only a file-id; resolve it the
        // same way a file segment without a URL gets resolved.
        None => resolve_via_source_peer(ctx, seg).await,
    };
    let Some(url) = resolved else {
        return Segment::new(kind::IMAGE);
    };
    let ambiguous = seg.get("subType") == Some("1");
    if !ambiguous {
        return Segment::new(kind::IMAGE).with("url", url);
    }

    let hash = bridge_media::fingerprint(&url);
    let animated = match ctx.store.get_media_fingerprint(&hash) {
        Ok(Some(record)) => record.is_animated.unwrap_or(true),
        _ => match ctx.media.probe_head(&url).await {
            Ok(head) => bridge_media::is_animated(&head),
            // Network failure: preserve motion if present (spec.md §4.3).
            Err(_) => true,
        },
    };

    let kind_str = if animated { kind::ANIMATION } else { kind::IMAGE };
    Segment::new(kind_str).with("url", url)
}

async fn translate_file(ctx: &TranslateContext, seg: &Segment) -> Segment {
    let resolved_url = match seg.get("url") {
        Some(url) => Some(url.to_string()),
        None => resolve_via_source_peer(ctx, seg).await,
    };
    if let Some(url) = resolved_url {
        let mut out = Segment::new(kind::FILE).with("url", url);
        if let Some(name) = seg.get("name") {
            out = out.with("name", name);
        }
        return out;
    }
    let name = seg.get("name").unwrap_or("file");
    let size = seg.get("size").unwrap_or("?");
    Segment::text(format!("[file: {name}, {size} bytes]"))
}

/// Falls back to the source platform's own API to turn a bare `file_id`
/// into a fetchable URL, for image/file segments whose platform-native
/// wire shape carries an id rather than a URL (spec.md §4.3).
async fn resolve_via_source_peer(ctx: &TranslateContext, seg: &Segment) -> Option<String> {
    let file_id = seg.get("file_id")?;
    let peer = ctx.source_peer.as_ref()?;
    peer.fetch_file_url(file_id).await.ok().flatten()
}

async fn translate_mention(ctx: &TranslateContext, seg: &Segment) -> Segment {
    let Some(user_id) = seg.get("user_id") else {
        return Segment::text("@");
    };
    let now = Utc::now().timestamp();
    if ctx.store.should_refresh_user(ctx.source_platform, user_id, None, now, ctx.mention_refresh_interval_secs).unwrap_or(true) {
        debug!(user_id, "mention refresh is due; caller should hydrate UserDisplayInfo before next lookup");
    }
    let name = ctx.store.get_display_name(ctx.source_platform, user_id, None).unwrap_or_else(|_| user_id.to_string());
    Segment::text(format!("@{name} "))
}

async fn resolve_reply(ctx: &TranslateContext, seg: &Segment) -> Option<Segment> {
    let message_id = seg.get("id")?;
    let target_id = ctx
        .store
        .get_target_id(ctx.source_platform, message_id, ctx.target_platform)
        .ok()
        .flatten()
        .or_else(|| ctx.store.get_source_id(ctx.source_platform, message_id, ctx.target_platform).ok().flatten());
    target_id.map(|id| Segment::new(kind::REPLY).with("id", id))
}

fn translate_forward_stub(seg: &Segment) -> Segment {
    let count = seg.get("count").unwrap_or("several");
    Segment::text(format!("[forwarded messages: {count}]"))
}

fn translate_node(seg: &Segment) -> Segment {
    let user = seg.get("user").unwrap_or("someone");
    let content = seg.get("content").unwrap_or("");
    Segment::text(format!("👤 {user}: {content}"))
}

fn translate_card(seg: &Segment) -> Segment {
    let title = seg.get("title").unwrap_or("");
    let desc = seg.get("desc").unwrap_or("");
    let url = seg.get("url").unwrap_or("");
    let app = seg.get("app").unwrap_or("");
    let mut text = format!("📱 {title}\n{desc}");
    if !url.is_empty() {
        text.push_str(&format!("\n🔗 {url}"));
    }
    if !app.is_empty() {
        text.push_str(&format!("\n📦 {app}"));
    }
    Segment::text(text)
}
