//! Route targets carried by `route` actions.

use crate::error::{Result, TelemetryError};
use crate::matching::Validatable;
use serde_json::Value;

/// Legacy routing argument handed to a channel along with a routed event.
///
/// Discriminated by `datapointId`, `streamId` or `propertyName`.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteArgument {
    Datapoint(u64),
    Stream(u64),
    Property(String),
    Invalid(Value),
}

impl From<Value> for RouteArgument {
    fn from(raw: Value) -> Self {
        let decoded = match raw.as_object() {
            Some(object) => {
                if let Some(v) = object.get("datapointId") {
                    v.as_u64().map(RouteArgument::Datapoint)
                } else if let Some(v) = object.get("streamId") {
                    v.as_u64().map(RouteArgument::Stream)
                } else if let Some(v) = object.get("propertyName") {
                    v.as_str().map(|s| RouteArgument::Property(s.to_string()))
                } else {
                    None
                }
            }
            None => None,
        };
        decoded.unwrap_or(RouteArgument::Invalid(raw))
    }
}

impl RouteArgument {
    /// Document form, as handed to channels that persist routed events.
    pub fn to_json(&self) -> Value {
        match self {
            RouteArgument::Datapoint(id) => serde_json::json!({ "datapointId": id }),
            RouteArgument::Stream(id) => serde_json::json!({ "streamId": id }),
            RouteArgument::Property(name) => serde_json::json!({ "propertyName": name }),
            RouteArgument::Invalid(raw) => raw.clone(),
        }
    }
}

impl Validatable for RouteArgument {
    fn validate_self(&self) -> Result<()> {
        match self {
            RouteArgument::Datapoint(0) => Err(TelemetryError::validation("zero datapointId")),
            RouteArgument::Stream(0) => Err(TelemetryError::validation("zero streamId")),
            RouteArgument::Property(name) if name.is_empty() => {
                Err(TelemetryError::validation("empty propertyName"))
            }
            RouteArgument::Invalid(raw) => Err(TelemetryError::validation(format!(
                "unrecognized route args {}",
                raw
            ))),
            _ => Ok(()),
        }
    }
}

/// One `{channelId, args}` entry of a route action.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub channel_id: String,
    pub argument: RouteArgument,
}

impl From<Value> for RouteTarget {
    fn from(raw: Value) -> Self {
        let channel_id = raw
            .get("channelId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let argument = raw
            .get("args")
            .cloned()
            .map(RouteArgument::from)
            .unwrap_or(RouteArgument::Invalid(Value::Null));
        RouteTarget {
            channel_id,
            argument,
        }
    }
}

impl Validatable for RouteTarget {
    fn validate_self(&self) -> Result<()> {
        if self.channel_id.is_empty() {
            return Err(TelemetryError::validation("empty route channelId"));
        }
        Ok(())
    }

    fn children(&self) -> Vec<&dyn Validatable> {
        vec![&self.argument as &dyn Validatable]
    }
}
