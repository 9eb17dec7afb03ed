/// Returns early with `$error` unless `$predicate` holds.
///
/// ```text
/// ensure!(offset % 4 == 0, FlashError::Unaligned { offset });
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
