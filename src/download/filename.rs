//! Filename guessing, extension repair and sanitization for downloads.
//!
//! Servers regularly send a generic `application/octet-stream` body or a
//! name without any extension; browsers then save `file.bin`. The helpers
//! here derive a usable name from `Content-Disposition`, the mime type and
//! the URL, in that priority order.

use std::path::{Component, Path};

use url::Url;

/// Mime type of an installable Android package.
pub const PACKAGE_ARCHIVE_MIME: &str = "application/vnd.android.package-archive";

/// Extension forced for installable packages.
pub const PACKAGE_EXTENSION: &str = "apk";

/// Name used when neither the headers nor the URL provide one.
const FALLBACK_STEM: &str = "downloadfile";

/// Generic extension given to bodies of unknown type.
const GENERIC_EXTENSION: &str = ".bin";

/// Resolves the name a new download is saved under.
///
/// The name is guessed with [`guess_filename`] and then repaired with
/// [`normalize_extension`].
#[must_use]
pub fn resolve_download_filename(
    url: &str,
    content_disposition: Option<&str>,
    mime: Option<&str>,
) -> String {
    let guessed = guess_filename(url, content_disposition, mime);
    normalize_extension(&guessed, url, mime)
}

/// Guesses a filename the way browsers do.
///
/// 1. `Content-Disposition` filename
/// 2. Last URL path segment (percent-decoded)
/// 3. `downloadfile`
///
/// A name without extension gets one from the mime type, or `.bin`.
#[must_use]
pub fn guess_filename(url: &str, content_disposition: Option<&str>, mime: Option<&str>) -> String {
    let from_header = content_disposition
        .and_then(parse_content_disposition)
        .filter(|name| !name.trim().is_empty());

    let name = from_header
        .or_else(|| last_path_segment(url))
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    let name = sanitize_filename(&name);

    if name.contains('.') {
        return name;
    }

    let extension = mime
        .and_then(extension_for_mime)
        .map_or_else(|| GENERIC_EXTENSION.to_string(), |ext| format!(".{ext}"));
    format!("{name}{extension}")
}

/// Repairs a generic or missing extension.
///
/// When `filename` ends in `.bin` or has no extension, the first of these wins:
/// 1. package-archive mime → `.apk`
/// 2. extension registered for the mime type
/// 3. the URL's own path extension, if 2–5 characters long
/// 4. otherwise the name is kept
///
/// Independently of that, a URL path ending in `.apk` or a package-archive
/// mime always yields a `.apk` name.
#[must_use]
pub fn normalize_extension(filename: &str, url: &str, mime: Option<&str>) -> String {
    let mime = mime.map(normalize_mime);
    let is_package = mime.as_deref() == Some(PACKAGE_ARCHIVE_MIME);
    let url_extension = url_path_extension(url);

    let mut name = filename.to_string();

    if has_generic_extension(&name) {
        let stem = strip_generic_extension(&name).to_string();
        let replacement = if is_package {
            Some(PACKAGE_EXTENSION.to_string())
        } else if let Some(ext) = mime.as_deref().and_then(extension_for_mime) {
            Some(ext.to_string())
        } else {
            url_extension
                .clone()
                .filter(|ext| (2..=5).contains(&ext.len()))
        };
        if let Some(ext) = replacement {
            name = format!("{stem}.{ext}");
        }
    }

    let url_is_package = url_extension.as_deref() == Some(PACKAGE_EXTENSION);
    if (url_is_package || is_package) && !name.to_ascii_lowercase().ends_with(".apk") {
        name = format!("{}.{PACKAGE_EXTENSION}", strip_generic_extension(&name));
    }

    name
}

/// Name used when an external record is re-enqueued.
///
/// A stored title that already has an extension is kept; otherwise a fresh
/// name is guessed from the URL and mime type. Either way a generic `.bin`
/// is repaired with [`normalize_extension`].
#[must_use]
pub fn restart_filename(title: &str, uri: &str, mime: Option<&str>) -> String {
    let base = if title.contains('.') {
        sanitize_filename(title)
    } else {
        guess_filename(uri, None, mime)
    };
    normalize_extension(&base, uri, mime)
}

/// Extension registered for a mime type, without the leading dot.
///
/// `application/octet-stream` and unknown types return `None`.
#[must_use]
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime = normalize_mime(content_type);

    let ext = match mime.as_str() {
        PACKAGE_ARCHIVE_MIME => PACKAGE_EXTENSION,
        "text/html" => "html",
        "text/plain" => "txt",
        "text/css" => "css",
        "text/csv" => "csv",
        "text/javascript" | "application/javascript" => "js",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/x-7z-compressed" => "7z",
        "application/vnd.rar" | "application/x-rar-compressed" => "rar",
        "application/epub+zip" => "epub",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        _ => return None,
    };
    Some(ext)
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Returns `filename` unless `taken` reports it in use, otherwise the first
/// free `stem_N.ext` counting from 1.
pub fn unique_filename(filename: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if !taken(filename) {
        return filename.to_string();
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };

    let mut suffix = 1usize;
    loop {
        let candidate = format!("{stem}_{suffix}{ext}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn normalize_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn has_generic_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(GENERIC_EXTENSION) || !name.contains('.')
}

fn strip_generic_extension(name: &str) -> &str {
    if name.to_ascii_lowercase().ends_with(GENERIC_EXTENSION) {
        &name[..name.len() - GENERIC_EXTENSION.len()]
    } else {
        name
    }
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Lowercase extension of the URL's last path segment, without the dot.
pub(crate) fn url_path_extension(url: &str) -> Option<String> {
    let segment = last_path_segment(url)?;
    let dot_index = segment.rfind('.')?;
    let ext = &segment[dot_index + 1..];
    if ext.is_empty() || ext.len() > 12 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
