//! The process-wide sampling iteration limit. Kept in its own binary
//! because reconfiguring the limit would leak into concurrently running
//! sampling tests.

use frame_guard::config;
use frame_guard::prelude::*;

#[tokio::test]
async fn test_exhaustion_honors_the_configured_limit() {
    let schema = Schema::builder("doomed")
        .column("id", IntColumn::new())
        .rule(Rule::new("impossible", "1 = 2"))
        .build()
        .unwrap();

    config::set_max_sampling_iterations(3);
    let err = schema
        .sample(SampleRequest::new().rows(1).seed(1))
        .await
        .unwrap_err();
    config::restore_defaults();

    match err {
        GuardError::SamplingExhausted {
            schema, iterations, ..
        } => {
            assert_eq!(schema, "doomed");
            assert_eq!(iterations, 3);
        }
        other => panic!("expected SamplingExhausted, got {other}"),
    }
}
