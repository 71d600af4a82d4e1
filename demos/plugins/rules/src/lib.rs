//! Rules plugin - sample module for the Kiln host
//!
//! Build with `cargo build --release` in `demos/plugins` and copy the library
//! into the host's plugin directory.

use anyhow::{bail, Result};
use kiln::boundary::Value;
use kiln::plugins::{ModuleContext, ModuleDescriptor, Plugin};
use kiln::services::{Event, EventBus, EventHandler, Logger, Menu, MenuItem, Navigation, Settings};
use kiln::Version;
use std::sync::Arc;

const DESCRIPTOR: &str = include_str!("../plugin.json");
const PAGE: &str = "qrc:/Biiz/Rules/RulesPage.qml";

#[derive(Default)]
pub struct RulesPlugin {
    ctx: Option<ModuleContext>,
    rules: Vec<String>,
    // Dropped with the plugin, after the host released its clone
    on_order: Option<EventHandler>,
}

impl RulesPlugin {
    fn log(&self, message: &str) {
        if let Some(logger) = self.ctx.as_ref().and_then(|ctx| ctx.get::<dyn Logger>()) {
            logger.info("RulesPlugin", message);
        }
    }
}

impl Plugin for RulesPlugin {
    fn metadata(&self) -> ModuleDescriptor {
        ModuleDescriptor::from_json(DESCRIPTOR)
            .unwrap_or_else(|_| ModuleDescriptor::new("com.biiz.rules", Version::new(1, 0, 0)))
    }

    fn initialize(&mut self, ctx: &ModuleContext) -> Result<()> {
        self.rules = match ctx.get::<dyn Settings>().and_then(|s| s.value("rules/list")) {
            Some(Value::StringList(list)) => list,
            _ => vec!["Discount over 100".to_string(), "Free shipping".to_string()],
        };
        self.ctx = Some(ctx.clone());
        self.log("Initialized");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let Some(ctx) = &self.ctx else {
            bail!("start called before initialize");
        };

        if let Some(nav) = ctx.get::<dyn Navigation>() {
            nav.register_route("rules", PAGE);
        }
        if let Some(menu) = ctx.get::<dyn Menu>() {
            menu.register_item(
                &MenuItem::new("rules", "Rules")
                    .with_route("rules")
                    .with_group("Business", 20)
                    .with_icon("rule")
                    .owned_by(ctx.owner()),
            )?;
            menu.set_badge("rules", &self.rules.len().to_string())?;
        }
        if let Some(bus) = ctx.get::<dyn EventBus>() {
            let logger = ctx.get::<dyn Logger>();
            let handler: EventHandler = Arc::new(move |event: &Event| {
                if let Some(logger) = &logger {
                    logger.debug("RulesPlugin", &format!("Evaluating rules for {}", event.topic));
                }
            });
            bus.subscribe("orders/*", ctx.owner(), Arc::clone(&handler));
            self.on_order = Some(handler);
            bus.publish("rules/loaded", &Value::from(self.rules.clone()), ctx.owner());
        }

        self.log(&format!("Started with {} rule(s)", self.rules.len()));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(settings) = self.ctx.as_ref().and_then(|ctx| ctx.get::<dyn Settings>()) {
            settings.set_value("rules/list", &Value::from(self.rules.clone()));
        }
        self.log("Stopped");
    }
}

kiln::declare_plugin!(DESCRIPTOR, || Box::new(RulesPlugin::default()));
