use cucumber::World as _;
use cucumber_ext::CyclebenchWorld;

const FEATURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/features");

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    cyclebench_config::logging::init_tracing();

    CyclebenchWorld::cucumber()
        .max_concurrent_scenarios(Some(1))
        .fail_on_skipped()
        .run_and_exit(FEATURES_PATH)
        .await;
}
