//! Shared sub-operation URI builder. Used by both the single-object
//! adapters and the batch RPC encoder so the two modes are bit-identical.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::BatchOp;

/// Base64url-encodes `{bucket}:{key}` into the opaque "entry" token every
/// sub-operation addresses an object by.
#[must_use]
pub fn encode_entry(bucket: &str, key: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{bucket}:{key}"))
}

/// Builds the path+query for one sub-operation, shared verbatim by batch
/// packing and single-object calls.
#[must_use]
pub fn build_subop(op: &BatchOp) -> String {
    let entry = encode_entry(&op.bucket, &op.key);
    match op.kind {
        super::BatchOpKind::Stat => format!("/stat/{entry}"),
        super::BatchOpKind::Delete => format!("/delete/{entry}"),
        super::BatchOpKind::Copy | super::BatchOpKind::Move => {
            let dest = encode_entry(
                op.dest_bucket.as_deref().unwrap_or(&op.bucket),
                op.dest_key.as_deref().unwrap_or(&op.key),
            );
            let verb = if op.kind == super::BatchOpKind::Copy {
                "copy"
            } else {
                "move"
            };
            format!("/{verb}/{entry}/{dest}/force/{}", op.force as u8)
        }
        super::BatchOpKind::ChType => {
            format!("/chtype/{entry}/type/{}", op.file_type.unwrap_or(0))
        }
        super::BatchOpKind::ChMime => {
            let mime = URL_SAFE_NO_PAD.encode(op.mime.as_deref().unwrap_or(""));
            format!("/chgm/{entry}/mime/{mime}")
        }
        super::BatchOpKind::ChStatus => {
            format!("/chstatus/{entry}/status/{}", op.status.unwrap_or(0))
        }
        super::BatchOpKind::DeleteAfterDays => {
            format!("/deleteAfterDays/{entry}/{}", op.days.unwrap_or(0))
        }
        super::BatchOpKind::RestoreAr => {
            format!("/restoreAr/{entry}/freezeAfterDays/{}", op.days.unwrap_or(0))
        }
    }
}
