//! M3U8 playlist helpers: listing referenced segments, batch-deleting
//! them, and rewriting host prefixes in place.

use crate::BatchOp;

/// Parses a playlist body, resolving each `.ts` reference to a full
/// bucket key relative to `playlist_key`'s directory. Returns
/// `[playlist_key] ++ segment_keys`, matching the source CLI's
/// `M3u8Manager.List` ordering. Spare leading slashes on a
/// bucket-rooted reference are collapsed to one, the source CLI's
/// `remove-spare-pre-slash` default.
#[must_use]
pub fn list(playlist_key: &str, body: &str) -> Vec<String> {
    list_with_options(playlist_key, body, true)
}

/// Like [`list`], but lets the caller disable spare-leading-slash
/// collapsing (the source CLI's `--remove-spare-pre-slash=false`).
#[must_use]
pub fn list_with_options(playlist_key: &str, body: &str, remove_spare_pre_slash: bool) -> Vec<String> {
    let dir = playlist_key.rsplit_once('/').map_or("", |(d, _)| d);
    let mut keys = vec![playlist_key.to_owned()];
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        keys.push(resolve_segment(dir, line, remove_spare_pre_slash));
    }
    keys
}

/// Collapses a run of leading slashes down to exactly one.
fn collapse_leading_slashes(reference: &str) -> String {
    let bare = reference.trim_start_matches('/');
    if bare.len() == reference.len() {
        reference.to_owned()
    } else {
        format!("/{bare}")
    }
}

/// Resolves one segment reference to a full key: a reference rooted at
/// the bucket (leading `/`) is kept as-is relative to the bucket, with
/// its spare leading slashes collapsed to one when
/// `remove_spare_pre_slash` is set; anything else joins onto `dir`.
fn resolve_segment(dir: &str, reference: &str, remove_spare_pre_slash: bool) -> String {
    if reference.starts_with('/') {
        if remove_spare_pre_slash {
            collapse_leading_slashes(reference)
        } else {
            reference.to_owned()
        }
    } else if dir.is_empty() {
        reference.to_owned()
    } else {
        format!("{dir}/{reference}")
    }
}

/// Builds the batch-delete ops for a playlist and all its segments,
/// ready to hand to [`crate::batchrpc::run_batch`] (which chunks at
/// [`crate::batchrpc::BATCH_ALLOW_MAX`] automatically).
#[must_use]
pub fn delete_ops(bucket: &str, playlist_key: &str, body: &str) -> Vec<BatchOp> {
    list(playlist_key, body)
        .into_iter()
        .map(|key| BatchOp::delete(bucket, key))
        .collect()
}

/// Rewrites every `old_host` occurrence to `new_host` in a playlist body.
/// The caller is responsible for re-uploading the rewritten body
/// atomically (the resumable upload path handles that).
#[must_use]
pub fn replace_domain(body: &str, old_host: &str, new_host: &str) -> String {
    body.replace(old_host, new_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:10,\nseg0.ts\n#EXTINF:10,\nseg1.ts\n";

    #[test]
    fn list_includes_playlist_and_resolved_segments() {
        let keys = list("videos/show/index.m3u8", PLAYLIST);
        assert_eq!(
            keys,
            vec![
                "videos/show/index.m3u8".to_string(),
                "videos/show/seg0.ts".to_string(),
                "videos/show/seg1.ts".to_string(),
            ]
        );
    }

    #[test]
    fn absolute_segment_reference_is_not_rejoined_to_dir() {
        let body = "/other/seg0.ts\n";
        let keys = list("videos/show/index.m3u8", body);
        assert_eq!(keys[1], "/other/seg0.ts");
    }

    #[test]
    fn spare_leading_slashes_on_an_absolute_reference_collapse_to_one() {
        let body = "//seg0.ts\n";
        let keys = list("videos/show/index.m3u8", body);
        assert_eq!(keys[1], "/seg0.ts");
    }

    #[test]
    fn spare_leading_slashes_are_kept_when_collapsing_is_disabled() {
        let keys = list_with_options("videos/show/index.m3u8", "//seg0.ts\n", false);
        assert_eq!(keys[1], "//seg0.ts");
    }

    #[test]
    fn delete_ops_covers_playlist_and_every_segment() {
        let ops = delete_ops("b", "videos/show/index.m3u8", PLAYLIST);
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| op.kind == crate::BatchOpKind::Delete));
    }

    #[test]
    fn replace_domain_rewrites_every_occurrence() {
        let body = "https://old.example.com/a.ts\nhttps://old.example.com/b.ts\n";
        let rewritten = replace_domain(body, "old.example.com", "new.example.com");
        assert!(!rewritten.contains("old.example.com"));
        assert_eq!(rewritten.matches("new.example.com").count(), 2);
    }
}
