use dirq::config::Config;
use dirq::{Retention, State};

// One test: the process environment is shared across test threads.
#[test]
fn config_from_env_loads_and_validates() {
    unsafe {
        std::env::remove_var("DIRQ_BASE_DIR");
        std::env::remove_var("DIRQ_RETENTION");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("DIRQ_BASE_DIR", "/tmp/dirq-config-test");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.base_dir, std::path::PathBuf::from("/tmp/dirq-config-test"));
    assert_eq!(config.retention, Retention::ALL);
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("DIRQ_RETENTION", "failed");
    }
    let config = Config::from_env().unwrap();
    assert!(config.retention.keeps(State::Failed));
    assert!(!config.retention.keeps(State::Success));

    unsafe {
        std::env::set_var("DIRQ_RETENTION", "failed,bogus");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("DIRQ_BASE_DIR");
        std::env::remove_var("DIRQ_RETENTION");
    }
}
