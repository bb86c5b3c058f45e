// Section/key accessors over a parsed `toml::Value`. The hard variant bails
// out of the enclosing function with a readable message; the soft variant
// logs and falls back to a default.

macro_rules! tomlget {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .ok_or_else(|| format!("failed to get section {}", $sec))?
            .get($key)
            .ok_or_else(|| format!("failed to get key {}:{}", $sec, $key))?
            .$conv()
            .ok_or_else(|| format!("failed to convert {}:{} to {}", $sec, $key, stringify!($as)))?
            as $as
    };
    ($cfg:ident, $sec:expr, $key:expr, as_bool) => {
        $cfg.get($sec)
            .ok_or_else(|| format!("failed to get section {}", $sec))?
            .get($key)
            .ok_or_else(|| format!("failed to get key {}:{}", $sec, $key))?
            .as_bool()
            .ok_or_else(|| format!("failed to convert {}:{} to boolean", $sec, $key))?
    };
}

macro_rules! tomlget_or {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty, $or:expr) => {
        match $cfg
            .get($sec)
            .and_then(|section| section.get($key))
            .and_then(|value| value.$conv())
        {
            Some(value) => value as $as,
            None => {
                log::warn!(
                    "no usable {}:{} in config; proceeding with default {:?}",
                    $sec,
                    $key,
                    $or
                );
                $or
            }
        }
    };
    ($cfg:ident, $sec:expr, $key:expr, as_bool, $or:expr) => {
        match $cfg
            .get($sec)
            .and_then(|section| section.get($key))
            .and_then(toml::Value::as_bool)
        {
            Some(value) => value,
            None => {
                log::warn!(
                    "no usable {}:{} in config; proceeding with default {:?}",
                    $sec,
                    $key,
                    $or
                );
                $or
            }
        }
    };
}

pub(crate) use {tomlget, tomlget_or};
