//! File URL resolution for whiteboard objects that reference stored files.
//!
//! The file storage subsystem lives elsewhere; this module only consumes its
//! id -> URL contract. Objects carrying a positive `fileId` are projected per
//! recipient, because the URLs embed the recipient's identity token.

use serde_json::Value;

use crate::services::whiteboard::ObjectState;

/// Kind of stored file an object points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Recording,
    Presentation,
    Folder,
    PollChart,
    WmlFile,
    Other,
}

impl FileKind {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Image" => Self::Image,
            "Video" => Self::Video,
            "Recording" => Self::Recording,
            "Presentation" => Self::Presentation,
            "Folder" => Self::Folder,
            "PollChart" => Self::PollChart,
            "WmlFile" => Self::WmlFile,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Recording => "Recording",
            Self::Presentation => "Presentation",
            Self::Folder => "Folder",
            Self::PollChart => "PollChart",
            Self::WmlFile => "WmlFile",
            Self::Other => "Other",
        }
    }
}

/// Who the URLs are being built for.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Recipient identity token.
    pub recipient: &'a str,
    /// Room container uid.
    pub room_uid: &'a str,
    /// Whiteboard object uid.
    pub object_uid: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedFile {
    pub src: String,
    pub poster: Option<String>,
    /// Presentation whose backing file no longer exists.
    pub deleted: bool,
}

pub trait FileResolver: Send + Sync {
    /// Display URL (and poster for media) for a file, or `None` if unknown.
    fn resolve(&self, file_id: i64, kind: FileKind, ctx: &ResolveContext<'_>) -> Option<ResolvedFile>;
}

/// Builds URLs under a configured base path. Does not check existence.
#[derive(Debug, Clone)]
pub struct UrlFileResolver {
    base_url: String,
}

impl UrlFileResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    fn room_url(&self, file_id: i64, ctx: &ResolveContext<'_>) -> String {
        format!(
            "{}/room/{file_id}?uid={}&ruid={}&wuid={}",
            self.base_url, ctx.recipient, ctx.room_uid, ctx.object_uid
        )
    }
}

impl FileResolver for UrlFileResolver {
    fn resolve(&self, file_id: i64, kind: FileKind, ctx: &ResolveContext<'_>) -> Option<ResolvedFile> {
        if file_id <= 0 {
            return None;
        }
        let resolved = match kind {
            FileKind::Folder | FileKind::PollChart => return None,
            FileKind::Video => {
                let src = self.room_url(file_id, ctx);
                ResolvedFile { poster: Some(format!("{src}&preview=true")), src, deleted: false }
            }
            FileKind::Recording => {
                let query = format!("uid={}&ruid={}&wuid={}", ctx.recipient, ctx.room_uid, ctx.object_uid);
                ResolvedFile {
                    src: format!("{}/recording/{file_id}.mp4?{query}", self.base_url),
                    poster: Some(format!("{}/recording/{file_id}.jpg?{query}", self.base_url)),
                    deleted: false,
                }
            }
            _ => ResolvedFile { src: self.room_url(file_id, ctx), poster: None, deleted: false },
        };
        Some(resolved)
    }
}

/// Copy of `obj` with resolved URL fields for one recipient. Objects without
/// a positive `fileId`, or whose file cannot be resolved, come back unchanged.
#[must_use]
pub fn project_object(
    resolver: &dyn FileResolver,
    obj: &ObjectState,
    recipient: &str,
    room_uid: &str,
) -> ObjectState {
    let file_id = obj.get("fileId").and_then(Value::as_i64).unwrap_or(-1);
    if file_id <= 0 {
        return obj.clone();
    }
    let kind = FileKind::parse(obj.get("fileType").and_then(Value::as_str).unwrap_or(""));
    let object_uid = obj.get("uid").and_then(Value::as_str).unwrap_or("");
    let ctx = ResolveContext { recipient, room_uid, object_uid };
    let Some(resolved) = resolver.resolve(file_id, kind, &ctx) else {
        return obj.clone();
    };

    let mut out = obj.clone();
    match kind {
        FileKind::Video | FileKind::Recording => {
            out.insert("_src".into(), Value::String(resolved.src));
            if let Some(poster) = resolved.poster {
                out.insert("_poster".into(), Value::String(poster));
            }
        }
        FileKind::Presentation => {
            out.insert("_src".into(), Value::String(resolved.src));
            out.insert("deleted".into(), Value::Bool(resolved.deleted));
        }
        _ => {
            out.insert("src".into(), Value::String(resolved.src));
        }
    }
    out
}

#[cfg(test)]
#[path = "files_test.rs"]
mod tests;
