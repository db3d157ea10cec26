//! Integration tests for layered configuration loading

use super::test_utils::with_isolated_home;
use storyloom::config::{CheckpointBackend, ConfigLoader, EndingPolicy, ServerType};
use storyloom::error::ApiError;

#[test]
fn environment_file_layers_over_workspace_file() {
    with_isolated_home(|dir| {
        let workspace = dir.path().join("ws");
        let config_dir = workspace.join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[story]\nending_policy = \"none\"\noutline_node_beam_width = 4\n",
        )
        .unwrap();
        std::fs::write(
            config_dir.join("staging.toml"),
            "[story]\nending_policy = \"append-passage\"\n",
        )
        .unwrap();

        std::env::set_var("STORYLOOM_ENV", "staging");
        let config = ConfigLoader::load(&workspace);
        std::env::remove_var("STORYLOOM_ENV");

        let config = config.unwrap();
        assert_eq!(config.story.ending_policy, EndingPolicy::AppendPassage);
        assert_eq!(config.story.outline_node_beam_width, 4);
    });
}

#[test]
fn nested_environment_overrides_apply() {
    with_isolated_home(|dir| {
        std::env::set_var("STORYLOOM__SERVER__SERVER_TYPE", "vllm");
        std::env::set_var("STORYLOOM__CHECKPOINT__BACKEND", "sled");
        let config = ConfigLoader::load(dir.path());
        std::env::remove_var("STORYLOOM__SERVER__SERVER_TYPE");
        std::env::remove_var("STORYLOOM__CHECKPOINT__BACKEND");

        let config = config.unwrap();
        assert_eq!(config.server.server_type, ServerType::Vllm);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Sled);
    });
}

#[test]
fn invalid_numbers_fail_validation() {
    with_isolated_home(|dir| {
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            "[plan.outline]\nmin_children = 4\nmax_children = 2\n",
        )
        .unwrap();
        let err = ConfigLoader::load_validated(dir.path(), Some(&path)).unwrap_err();
        assert!(matches!(err, ApiError::ConfigError(_)));
    });
}

#[test]
fn unknown_scorer_fails_to_load() {
    with_isolated_home(|dir| {
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[story.score]\nscorers = [\"vibes\"]\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    });
}
