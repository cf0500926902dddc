//! Robot configuration: schema, loading, env substitution and validation.
//!
//! Layout under the config directory:
//!
//! ```text
//! conf/robot.yaml            (or .yml, .toml, .json)
//! conf/plugins/<name>.yaml
//! conf/jobs/<name>.yaml
//! conf/tasks/<name>.yaml
//! ```
//!
//! `${ENV_VAR}` placeholders are substituted in the raw text before parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        find_robot_file, from_value, load_config_value, load_robot_config, load_task_config,
        load_task_value, merge_task_values, parse_value, resolve_config_dir,
    },
    schema::{
        Elevation, ElevationMode, ExternalTask, HelpEntry, InputMatcher, Parameter, RobotConfig,
        ScheduledJob, TaskConfig, UserEntry, normalize_schedule,
    },
    validate::{
        Diagnostic, KnownNames, Severity, ValidationResult, valid_task_name, validate_robot,
        validate_task,
    },
};
