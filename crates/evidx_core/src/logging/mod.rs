use tracing_subscriber::EnvFilter;

use crate::error::{codes, AppError};

/// Install the process-wide fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this more than once is a no-op, so tests and
/// embedding applications can both call it.
pub fn init(default_filter: &str) -> Result<(), AppError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Invalid log filter")
                .with_details(format!("filter={default_filter}; err={e}"))
        })?,
    };

    // An already-installed global subscriber is not an error here.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_ok() {
        init("info").expect("first");
        init("debug").expect("second");
    }
}
