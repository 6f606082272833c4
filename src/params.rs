use crate::error::{isolate, HostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// The three audiences a plugin's parameters are split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterGroupKind {
    Structural,
    Visual,
    Advanced,
}

impl ParameterGroupKind {
    pub const ALL: [ParameterGroupKind; 3] =
        [ParameterGroupKind::Structural, ParameterGroupKind::Visual, ParameterGroupKind::Advanced];

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterGroupKind::Structural => "structural",
            ParameterGroupKind::Visual => "visual",
            ParameterGroupKind::Advanced => "advanced",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for ParameterGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Number,
    Slider,
    Checkbox,
    Dropdown,
    Color,
    Text,
}

impl ParameterKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ParameterKind::Number | ParameterKind::Slider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Number(_) => "number",
            ParameterValue::Text(_) => "text",
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Number(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub value: String,
    pub label: String,
}

impl ParameterOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub id: String,
    pub kind: ParameterKind,
    pub label: String,
    pub default: ParameterValue,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub options: Vec<ParameterOption>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterDef {
    fn bare(id: &str, kind: ParameterKind, label: &str, default: ParameterValue) -> Self {
        Self {
            id: id.to_string(),
            kind,
            label: label.to_string(),
            default,
            min: None,
            max: None,
            step: None,
            options: Vec::new(),
            description: None,
        }
    }

    pub fn slider(id: &str, label: &str, default: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            ..Self::bare(id, ParameterKind::Slider, label, default.into())
        }
    }

    pub fn number(id: &str, label: &str, default: f64, min: f64, max: f64) -> Self {
        Self { min: Some(min), max: Some(max), ..Self::bare(id, ParameterKind::Number, label, default.into()) }
    }

    pub fn checkbox(id: &str, label: &str, default: bool) -> Self {
        Self::bare(id, ParameterKind::Checkbox, label, default.into())
    }

    pub fn color(id: &str, label: &str, default: &str) -> Self {
        Self::bare(id, ParameterKind::Color, label, default.into())
    }

    pub fn text(id: &str, label: &str, default: &str) -> Self {
        Self::bare(id, ParameterKind::Text, label, default.into())
    }

    pub fn dropdown(id: &str, label: &str, default: &str, options: &[(&str, &str)]) -> Self {
        Self {
            options: options.iter().map(|(value, label)| ParameterOption::new(*value, *label)).collect(),
            ..Self::bare(id, ParameterKind::Dropdown, label, default.into())
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks the definition is complete for its kind.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(HostError::schema("<unnamed>", "parameter id must not be empty"));
        }
        if self.label.trim().is_empty() {
            return Err(HostError::schema(&self.id, "label must not be empty"));
        }
        if self.kind.is_numeric() {
            let (Some(min), Some(max)) = (self.min, self.max) else {
                return Err(HostError::schema(&self.id, "numeric parameters require min and max"));
            };
            if !(min <= max) {
                return Err(HostError::schema(&self.id, format!("min {min} exceeds max {max}")));
            }
            if let Some(step) = self.step {
                if !(step > 0.0) {
                    return Err(HostError::schema(&self.id, "step must be positive"));
                }
            }
        }
        if self.kind == ParameterKind::Dropdown && self.options.is_empty() {
            return Err(HostError::schema(&self.id, "dropdown parameters require at least one option"));
        }
        self.coerce(&self.default)
            .map_err(|err| HostError::schema(&self.id, format!("default rejected: {err}")))?;
        Ok(())
    }

    /// Normalises `value` for this parameter, clamping numbers into range.
    pub fn coerce(&self, value: &ParameterValue) -> Result<ParameterValue> {
        let mismatch = || {
            HostError::invalid_value(
                &self.id,
                format!("{:?} parameter cannot hold a {} value", self.kind, value.type_name()),
            )
        };
        match self.kind {
            ParameterKind::Number | ParameterKind::Slider => {
                let raw = value.as_f64().ok_or_else(mismatch)?;
                if raw.is_nan() {
                    return Err(HostError::invalid_value(&self.id, "NaN is not a valid number"));
                }
                let lo = self.min.unwrap_or(f64::NEG_INFINITY);
                let hi = self.max.unwrap_or(f64::INFINITY);
                Ok(ParameterValue::Number(raw.clamp(lo, hi)))
            }
            ParameterKind::Checkbox => value.as_bool().map(ParameterValue::Bool).ok_or_else(mismatch),
            ParameterKind::Dropdown => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                if self.options.iter().any(|option| option.value == raw) {
                    Ok(value.clone())
                } else {
                    Err(HostError::invalid_value(&self.id, format!("'{raw}' is not one of the options")))
                }
            }
            ParameterKind::Color => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                if parse_hex_color(raw).is_some() {
                    Ok(value.clone())
                } else {
                    Err(HostError::invalid_value(&self.id, format!("'{raw}' is not a #rrggbb colour")))
                }
            }
            ParameterKind::Text => value.as_str().map(|_| value.clone()).ok_or_else(mismatch),
        }
    }
}

/// Parses `#rrggbb` (or `#rgb`) into linear-ish 0..1 components.
pub fn parse_hex_color(raw: &str) -> Option<[f32; 3]> {
    let hex = raw.strip_prefix('#').filter(|hex| hex.is_ascii())?;
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok().map(|v| v as f32 / 255.0);
    Some([channel(0)?, channel(2)?, channel(4)?])
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParameterGroup {
    schema: Vec<ParameterDef>,
    values: HashMap<String, ParameterValue>,
}

impl ParameterGroup {
    pub fn schema(&self) -> &[ParameterDef] {
        &self.schema
    }

    pub fn value(&self, id: &str) -> Option<&ParameterValue> {
        self.values.get(id)
    }

    pub fn definition(&self, id: &str) -> Option<&ParameterDef> {
        self.schema.iter().find(|def| def.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Values in schema order.
    pub fn ordered_values(&self) -> impl Iterator<Item = (&ParameterDef, &ParameterValue)> {
        self.schema.iter().filter_map(|def| self.values.get(&def.id).map(|value| (def, value)))
    }
}

/// Snapshot handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterGroupView {
    pub kind: ParameterGroupKind,
    pub parameters: Vec<ParameterView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterView {
    pub definition: ParameterDef,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    User,
    Reset,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterChange {
    pub id: String,
    pub group: ParameterGroupKind,
    pub value: ParameterValue,
    pub previous: ParameterValue,
    pub cause: ChangeCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOwner {
    External,
    Plugin(String),
}

pub type ParameterListener = Box<dyn FnMut(&ParameterChange) -> anyhow::Result<()>>;

struct ListenerSlot {
    id: ListenerId,
    owner: ListenerOwner,
    callback: ParameterListener,
}

/// Typed parameter groups with change queueing.
///
/// Writes never call out directly. Each accepted change is queued and the owner drains the
/// queue with [`ParameterStore::pop_pending`], delivering every change to the active plugin
/// first and then to [`ParameterStore::notify_listeners`].
#[derive(Default)]
pub struct ParameterStore {
    groups: HashMap<ParameterGroupKind, ParameterGroup>,
    listeners: Vec<ListenerSlot>,
    next_listener: u64,
    pending: VecDeque<ParameterChange>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `group` with `schema`, seeding every value from its default.
    pub fn define(&mut self, group: ParameterGroupKind, schema: Vec<ParameterDef>) -> Result<()> {
        for (index, def) in schema.iter().enumerate() {
            def.validate()?;
            if schema[..index].iter().any(|other| other.id == def.id) {
                return Err(HostError::schema(&def.id, format!("duplicate id in {group} group")));
            }
            let clash = self
                .groups
                .iter()
                .find(|(kind, existing)| **kind != group && existing.definition(&def.id).is_some());
            if let Some((kind, _)) = clash {
                return Err(HostError::schema(&def.id, format!("already defined in {kind} group")));
            }
        }
        let values = schema.iter().map(|def| (def.id.clone(), def.default.clone())).collect();
        self.groups.insert(group, ParameterGroup { schema, values });
        log::debug!("[params] defined {group} group");
        Ok(())
    }

    pub fn group(&self, group: ParameterGroupKind) -> Option<&ParameterGroup> {
        self.groups.get(&group)
    }

    pub fn resolve_group(&self, id: &str) -> Option<ParameterGroupKind> {
        ParameterGroupKind::ALL
            .into_iter()
            .find(|kind| self.groups.get(kind).map_or(false, |group| group.values.contains_key(id)))
    }

    pub fn get(&self, id: &str) -> Option<&ParameterValue> {
        let group = self.resolve_group(id)?;
        self.groups.get(&group)?.value(id)
    }

    pub fn get_in(&self, group: ParameterGroupKind, id: &str) -> Option<&ParameterValue> {
        self.groups.get(&group)?.value(id)
    }

    pub fn number(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(ParameterValue::as_f64)
    }

    pub fn flag(&self, id: &str) -> Option<bool> {
        self.get(id).and_then(ParameterValue::as_bool)
    }

    pub fn text(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(ParameterValue::as_str)
    }

    /// Stores `value` and queues a change notification.
    ///
    /// Returns `Ok(false)` without touching anything when `id` cannot be resolved.
    pub fn set(&mut self, id: &str, value: ParameterValue, group: Option<ParameterGroupKind>) -> Result<bool> {
        self.set_with_cause(id, value, group, ChangeCause::User)
    }

    pub fn set_with_cause(
        &mut self,
        id: &str,
        value: ParameterValue,
        group: Option<ParameterGroupKind>,
        cause: ChangeCause,
    ) -> Result<bool> {
        let resolved = match group {
            Some(kind) => {
                Some(kind).filter(|kind| self.groups.get(kind).map_or(false, |g| g.values.contains_key(id)))
            }
            None => self.resolve_group(id),
        };
        let Some(kind) = resolved else {
            log::warn!("[params] ignoring update for unknown parameter '{id}'");
            return Ok(false);
        };
        let Some(entry) = self.groups.get_mut(&kind) else {
            return Ok(false);
        };
        let Some(def) = entry.schema.iter().find(|def| def.id == id) else {
            return Ok(false);
        };
        let value = def.coerce(&value)?;
        let previous = entry.values.insert(id.to_string(), value.clone()).unwrap_or_else(|| def.default.clone());
        self.pending.push_back(ParameterChange { id: id.to_string(), group: kind, value, previous, cause });
        Ok(true)
    }

    /// Restores defaults for `groups` (all groups when `None`), queueing one change per
    /// parameter in group then schema order.
    pub fn reset(&mut self, groups: Option<&[ParameterGroupKind]>) -> usize {
        let selected: Vec<ParameterGroupKind> = match groups {
            Some(kinds) => ParameterGroupKind::ALL.into_iter().filter(|kind| kinds.contains(kind)).collect(),
            None => ParameterGroupKind::ALL.to_vec(),
        };
        let mut restored = 0;
        for kind in selected {
            let Some(group) = self.groups.get_mut(&kind) else {
                continue;
            };
            for def in &group.schema {
                let previous = group
                    .values
                    .insert(def.id.clone(), def.default.clone())
                    .unwrap_or_else(|| def.default.clone());
                self.pending.push_back(ParameterChange {
                    id: def.id.clone(),
                    group: kind,
                    value: def.default.clone(),
                    previous,
                    cause: ChangeCause::Reset,
                });
                restored += 1;
            }
        }
        restored
    }

    /// Drops every group and queued change. Listeners stay registered.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.pending.clear();
    }

    pub fn pop_pending(&mut self) -> Option<ParameterChange> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn add_listener(&mut self, owner: ListenerOwner, callback: ParameterListener) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push(ListenerSlot { id, owner, callback });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|slot| slot.id != id);
        before != self.listeners.len()
    }

    pub fn remove_listeners_owned_by(&mut self, plugin_id: &str) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|slot| !matches!(&slot.owner, ListenerOwner::Plugin(owner) if owner == plugin_id));
        before - self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers `change` to every listener in registration order. A failing listener is
    /// logged and skipped.
    pub fn notify_listeners(&mut self, change: &ParameterChange) {
        for slot in &mut self.listeners {
            let callback = &mut slot.callback;
            if let Err(err) = isolate(|| callback(change)) {
                log::warn!("[params] listener {:?} failed on '{}': {err:#}", slot.id, change.id);
            }
        }
    }

    pub fn views(&self) -> Vec<ParameterGroupView> {
        ParameterGroupKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let group = self.groups.get(&kind)?;
                let parameters = group
                    .ordered_values()
                    .map(|(def, value)| ParameterView { definition: def.clone(), value: value.clone() })
                    .collect();
                Some(ParameterGroupView { kind, parameters })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn structural() -> Vec<ParameterDef> {
        vec![
            ParameterDef::slider("segments", "Segments", 12.0, 3.0, 64.0, 1.0),
            ParameterDef::dropdown("shape", "Shape", "circle", &[("circle", "Circle"), ("square", "Square")]),
        ]
    }

    fn drain(store: &mut ParameterStore) -> Vec<ParameterChange> {
        std::iter::from_fn(|| store.pop_pending()).collect()
    }

    #[test]
    fn define_seeds_defaults() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        assert_eq!(store.number("segments"), Some(12.0));
        assert_eq!(store.text("shape"), Some("circle"));
        assert!(!store.has_pending(), "define must not notify");
    }

    #[test]
    fn slider_without_bounds_is_rejected() {
        let mut store = ParameterStore::new();
        let mut def = ParameterDef::slider("size", "Size", 1.0, 0.0, 2.0, 0.1);
        def.max = None;
        let err = store.define(ParameterGroupKind::Visual, vec![def]).unwrap_err();
        assert!(matches!(err, HostError::InvalidSchema { .. }));
    }

    #[test]
    fn dropdown_without_options_is_rejected() {
        let mut store = ParameterStore::new();
        let def = ParameterDef::dropdown("mode", "Mode", "a", &[]);
        assert!(store.define(ParameterGroupKind::Visual, vec![def]).is_err());
    }

    #[test]
    fn ids_must_be_unique_across_groups() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        let clash = vec![ParameterDef::checkbox("segments", "Segments", true)];
        assert!(store.define(ParameterGroupKind::Visual, clash).is_err());
    }

    #[test]
    fn set_resolves_group_and_clamps() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        assert!(store.set("segments", 500.0.into(), None).unwrap());
        assert_eq!(store.number("segments"), Some(64.0));
        let changes = drain(&mut store);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous, ParameterValue::Number(12.0));
        assert_eq!(changes[0].group, ParameterGroupKind::Structural);
    }

    #[test]
    fn unknown_parameter_is_a_noop() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        assert!(!store.set("missing", 1.0.into(), None).unwrap());
        assert!(!store.set("segments", 4.0.into(), Some(ParameterGroupKind::Visual)).unwrap());
        assert!(!store.has_pending());
    }

    #[test]
    fn wrong_type_is_a_validation_error() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        let err = store.set("shape", "hexagon".into(), None).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.text("shape"), Some("circle"));
    }

    #[test]
    fn reset_notifies_in_schema_order() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        store
            .define(ParameterGroupKind::Visual, vec![ParameterDef::color("tint", "Tint", "#ff8800")])
            .unwrap();
        store.set("tint", "#000000".into(), None).unwrap();
        drain(&mut store);

        assert_eq!(store.reset(None), 3);
        let ids: Vec<_> = drain(&mut store).into_iter().map(|change| change.id).collect();
        assert_eq!(ids, ["segments", "shape", "tint"]);
        assert_eq!(store.text("tint"), Some("#ff8800"));
    }

    #[test]
    fn scoped_reset_leaves_other_groups() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        store.define(ParameterGroupKind::Visual, vec![ParameterDef::checkbox("glow", "Glow", false)]).unwrap();
        store.set("glow", true.into(), None).unwrap();
        store.set("segments", 20.0.into(), None).unwrap();
        drain(&mut store);

        store.reset(Some(&[ParameterGroupKind::Structural]));
        assert_eq!(store.number("segments"), Some(12.0));
        assert_eq!(store.flag("glow"), Some(true));
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let mut store = ParameterStore::new();
        store.define(ParameterGroupKind::Structural, structural()).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        store.add_listener(ListenerOwner::External, Box::new(|_| anyhow::bail!("listener broke")));
        let sink = seen.clone();
        store.add_listener(
            ListenerOwner::External,
            Box::new(move |change| {
                sink.borrow_mut().push(change.id.clone());
                Ok(())
            }),
        );
        store.set("segments", 8.0.into(), None).unwrap();
        let change = store.pop_pending().unwrap();
        store.notify_listeners(&change);
        assert_eq!(seen.borrow().as_slice(), ["segments"]);
    }

    #[test]
    fn plugin_owned_listeners_are_removed_together() {
        let mut store = ParameterStore::new();
        store.add_listener(ListenerOwner::Plugin("circle".into()), Box::new(|_| Ok(())));
        store.add_listener(ListenerOwner::Plugin("circle".into()), Box::new(|_| Ok(())));
        let external = store.add_listener(ListenerOwner::External, Box::new(|_| Ok(())));
        assert_eq!(store.remove_listeners_owned_by("circle"), 2);
        assert_eq!(store.listener_count(), 1);
        assert!(store.remove_listener(external));
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#ffffff"), Some([1.0, 1.0, 1.0]));
        assert_eq!(parse_hex_color("#000"), Some([0.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("ff0000"), None);
        assert_eq!(parse_hex_color("#zz0000"), None);
        assert_eq!(parse_hex_color("#aéaaa"), None);
        assert_eq!(parse_hex_color("#ééé"), None);
    }
}
