//! Outbound interface to whatever presents controls to the user.
//!
//! The host only ever pushes state through [`UiBridge`]; nothing is read back.

use crate::environment::Capability;
use crate::params::ParameterGroupView;
use crate::plugins::ActionDescriptor;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub const DEFAULT_NOTIFICATION: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginListing {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capability: Capability,
    pub enabled: bool,
}

pub trait UiBridge {
    fn update_plugins(&mut self, plugins: &[PluginListing], active: Option<&str>);
    fn update_parameter_groups(&mut self, groups: &[ParameterGroupView]);
    fn update_actions(&mut self, actions: &[ActionDescriptor]);
    fn show_error(&mut self, message: &str);
    fn show_notification(&mut self, message: &str, duration: Duration);
    fn show_loading(&mut self, message: &str);
    fn hide_loading(&mut self);
}

/// Writes every UI update to the log. Used by the headless binary.
#[derive(Debug, Default)]
pub struct LogUi;

impl UiBridge for LogUi {
    fn update_plugins(&mut self, plugins: &[PluginListing], active: Option<&str>) {
        log::info!("[ui] {} plugin(s), active: {}", plugins.len(), active.unwrap_or("none"));
    }

    fn update_parameter_groups(&mut self, groups: &[ParameterGroupView]) {
        let total: usize = groups.iter().map(|group| group.parameters.len()).sum();
        log::debug!("[ui] {total} parameter(s) across {} group(s)", groups.len());
    }

    fn update_actions(&mut self, actions: &[ActionDescriptor]) {
        log::debug!("[ui] {} action(s)", actions.len());
    }

    fn show_error(&mut self, message: &str) {
        log::error!("[ui] {message}");
    }

    fn show_notification(&mut self, message: &str, duration: Duration) {
        log::info!("[ui] {message} ({} ms)", duration.as_millis());
    }

    fn show_loading(&mut self, message: &str) {
        log::info!("[ui] {message}");
    }

    fn hide_loading(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Plugins { ids: Vec<String>, active: Option<String> },
    ParameterGroups(Vec<ParameterGroupView>),
    Actions(Vec<String>),
    Error(String),
    Notification(String),
    Loading(String),
    LoadingHidden,
}

/// Keeps every call. Clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct RecordingUi {
    events: Rc<RefCell<Vec<UiEvent>>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Notification(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_actions(&self) -> Option<Vec<String>> {
        self.events.borrow().iter().rev().find_map(|event| match event {
            UiEvent::Actions(ids) => Some(ids.clone()),
            _ => None,
        })
    }

    pub fn last_parameter_groups(&self) -> Option<Vec<ParameterGroupView>> {
        self.events.borrow().iter().rev().find_map(|event| match event {
            UiEvent::ParameterGroups(groups) => Some(groups.clone()),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn push(&self, event: UiEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl UiBridge for RecordingUi {
    fn update_plugins(&mut self, plugins: &[PluginListing], active: Option<&str>) {
        let ids = plugins.iter().map(|plugin| plugin.id.clone()).collect();
        self.push(UiEvent::Plugins { ids, active: active.map(str::to_string) });
    }

    fn update_parameter_groups(&mut self, groups: &[ParameterGroupView]) {
        self.push(UiEvent::ParameterGroups(groups.to_vec()));
    }

    fn update_actions(&mut self, actions: &[ActionDescriptor]) {
        self.push(UiEvent::Actions(actions.iter().map(|action| action.id.clone()).collect()));
    }

    fn show_error(&mut self, message: &str) {
        self.push(UiEvent::Error(message.to_string()));
    }

    fn show_notification(&mut self, message: &str, _duration: Duration) {
        self.push(UiEvent::Notification(message.to_string()));
    }

    fn show_loading(&mut self, message: &str) {
        self.push(UiEvent::Loading(message.to_string()));
    }

    fn hide_loading(&mut self) {
        self.push(UiEvent::LoadingHidden);
    }
}
