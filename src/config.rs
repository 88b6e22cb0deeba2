use ::config::Config;

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

// Missing keys fall back to the default; keys that are present but malformed
// are reported instead of silently ignored.
pub(crate) fn get_namespaced_usize_or(
    config: &Config,
    name: &str,
    key: &str,
    default: usize,
) -> Result<usize, config::ConfigError> {
    match get_namespaced_usize(config, name, key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(err) => Err(err),
    }
}
