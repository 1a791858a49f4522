//! The diff policy: decide whether an existing target object already
//! satisfies the source.

use crate::remote::{RemoteError, RemoteFs, RemoteInfo};

/// Whether the target object already satisfies the source: sizes match
/// exactly and the target's modification time, truncated to whole seconds,
/// is not earlier than the source's. An unset source time never matches;
/// sub-second clock and protocol rounding differences are absorbed by the
/// truncation.
pub fn up_to_date(source: &RemoteInfo, target: &RemoteInfo) -> bool {
    if target.size != source.size {
        return false;
    }
    let Some(source_mtime) = source.mtime_secs() else {
        return false;
    };
    match target.mtime_secs() {
        Some(target_mtime) => target_mtime >= source_mtime,
        None => false,
    }
}

/// Inspect `target_path` on the target and decide whether the copy can be
/// skipped. A missing target object means "do not skip"; any other
/// inspection failure is an error for the caller to propagate.
pub async fn should_skip(
    target: &dyn RemoteFs,
    target_path: &str,
    source: &RemoteInfo,
) -> Result<bool, RemoteError> {
    match target.stat(target_path).await {
        Ok(target_info) => Ok(up_to_date(source, &target_info)),
        Err(error) if error.is_not_found() => Ok(false),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn info(size: u64, mtime_secs: Option<u64>) -> RemoteInfo {
        RemoteInfo {
            name: "a.txt".to_string(),
            size,
            mtime: mtime_secs.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            mode: 0o644,
            is_dir: false,
        }
    }

    #[test]
    fn equal_size_and_newer_target_skips() {
        assert!(up_to_date(&info(10, Some(100)), &info(10, Some(100))));
        assert!(up_to_date(&info(10, Some(100)), &info(10, Some(200))));
    }

    #[test]
    fn size_mismatch_never_skips() {
        assert!(!up_to_date(&info(10, Some(100)), &info(11, Some(200))));
    }

    #[test]
    fn older_target_never_skips() {
        assert!(!up_to_date(&info(10, Some(100)), &info(10, Some(99))));
    }

    #[test]
    fn unset_source_mtime_never_skips() {
        assert!(!up_to_date(&info(10, None), &info(10, Some(200))));
    }

    #[test]
    fn unset_target_mtime_never_skips() {
        assert!(!up_to_date(&info(10, Some(100)), &info(10, None)));
    }

    #[test]
    fn sub_second_difference_is_absorbed() {
        let source = RemoteInfo {
            mtime: Some(UNIX_EPOCH + Duration::from_millis(100_900)),
            ..info(10, None)
        };
        let target = RemoteInfo {
            mtime: Some(UNIX_EPOCH + Duration::from_millis(100_100)),
            ..info(10, None)
        };
        assert!(up_to_date(&source, &target));
    }
}
