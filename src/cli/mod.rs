pub mod args;

use anyhow::{bail, Result};
use prefab_cloud::{Context, ContextValue};

/// Build a context from `type.attr=value` arguments.
///
/// Values that parse as bool, integer or float keep that type.
pub fn parse_context(pairs: &[String]) -> Result<Context> {
    let mut context = Context::new();
    for pair in pairs {
        let Some((path, raw)) = pair.split_once('=') else {
            bail!("invalid context `{}`: expected type.attr=value", pair);
        };
        let Some((context_type, attr)) = path.split_once('.') else {
            bail!("invalid context `{}`: expected type.attr=value", pair);
        };
        if context_type.is_empty() || attr.is_empty() {
            bail!("invalid context `{}`: empty type or attribute", pair);
        }
        context.set(context_type, attr, infer_value(raw));
    }
    Ok(context)
}

fn infer_value(raw: &str) -> ContextValue {
    if let Ok(b) = raw.parse::<bool>() {
        return ContextValue::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return ContextValue::Int(i);
    }
    if let Ok(d) = raw.parse::<f64>() {
        return ContextValue::Double(d);
    }
    ContextValue::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context_infers_types() {
        let pairs = vec![
            "user.id=123".to_string(),
            "user.email=a@b.com".to_string(),
            "device.mobile=true".to_string(),
            "device.ratio=1.5".to_string(),
        ];
        let context = parse_context(&pairs).unwrap();

        assert_eq!(context.get("user", "id"), Some(&ContextValue::Int(123)));
        assert_eq!(
            context.get("user", "email"),
            Some(&ContextValue::String("a@b.com".to_string()))
        );
        assert_eq!(context.get("device", "mobile"), Some(&ContextValue::Bool(true)));
        assert_eq!(context.get("device", "ratio"), Some(&ContextValue::Double(1.5)));
    }

    #[test]
    fn test_parse_context_rejects_malformed() {
        assert!(parse_context(&["user=1".to_string()]).is_err());
        assert!(parse_context(&["user.id".to_string()]).is_err());
        assert!(parse_context(&[".id=1".to_string()]).is_err());
    }
}
