//! Content-module contract.
//!
//! A content module owns some set of entities and runs once per tick after
//! physics. Modules never see the player store mutably. Whatever they emit
//! through `ModuleContext::emit` is logged and broadcast as an app event.

use crate::game::SimulationError;
use crate::player_store::PlayerStore;
use shared::wire::Value;
use shared::{EntityId, EntityState, PlayerId};
use std::collections::BTreeMap;

pub type EntityTable = BTreeMap<EntityId, EntityState>;

pub struct ModuleContext<'a> {
    pub tick: u32,
    pub dt: f64,
    pub players: &'a PlayerStore,
    pub entities: &'a mut EntityTable,
    emitted: Vec<(String, Value)>,
}

impl<'a> ModuleContext<'a> {
    pub fn new(tick: u32, dt: f64, players: &'a PlayerStore, entities: &'a mut EntityTable) -> Self {
        Self {
            tick,
            dt,
            players,
            entities,
            emitted: Vec::new(),
        }
    }

    /// Queues an app event for broadcast.
    pub fn emit(&mut self, name: impl Into<String>, data: Value) {
        self.emitted.push((name.into(), data));
    }

    pub fn into_emitted(self) -> Vec<(String, Value)> {
        self.emitted
    }
}

pub trait ContentModule: Send {
    fn name(&self) -> &str;

    /// Code bundle shipped to clients at handshake.
    fn code(&self) -> Vec<u8> {
        Vec::new()
    }

    fn tick(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), SimulationError>;

    fn on_app_event(
        &mut self,
        _player_id: PlayerId,
        _name: &str,
        _data: &Value,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<(), SimulationError> {
        Ok(())
    }
}
