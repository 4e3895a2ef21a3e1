pub mod api;
pub mod clock;
pub mod credentials;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod headers;
pub mod list_cache;
pub mod monitor;
pub mod response_cache;
pub mod throttle;

pub use api::{ApiError, CommentPage, Endpoints, PlatformClient};
pub use clock::{Clock, SystemClock};
pub use credentials::{CredentialError, CredentialManager, RefreshOutcome};
pub use error::{FatalHttpError, FatalKind, RequestError, TransientReason};
pub use executor::{PlatformRequest, PlatformResponse, RequestExecutor, RetryPolicy};
pub use list_cache::{CacheFetchError, ListCache, ListCacheFile, ListSource, VideoList};
pub use monitor::{MonitorStats, RateLimitMonitor};
pub use response_cache::{CacheEntry, ResponseCache};
pub use throttle::{Throttle, ThrottleConfig};

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;
