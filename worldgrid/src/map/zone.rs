//! Dynamic zone information: music, weather and light overrides, sent to players
//! entering a zone and broadcast to the zone's players on change.

use tracing::{instrument, trace};

use crate::context::{Outgoing, WeatherState};
use crate::entity::EntityId;

use super::Map;


/// A light override of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLight {
    pub area_light: u32,
    pub override_light: u32,
    pub transition_ms: u32,
}

/// Dynamic state of a zone, overriding its static defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneDynamicInfo {
    pub music_id: u32,
    pub weather: Option<(WeatherState, f32)>,
    pub light: Option<ZoneLight>,
}


impl Map {

    #[inline]
    pub fn zone_dynamic_info(&self, zone_id: u32) -> Option<&ZoneDynamicInfo> {
        self.zones.get(&zone_id)
    }

    /// Players currently in the given zone.
    fn zone_players(&self, zone_id: u32) -> Vec<EntityId> {
        self.players.iter()
            .copied()
            .filter(|&id| self.entities.get(&id)
                .and_then(|entity| entity.as_player())
                .is_some_and(|player| player.zone_id == zone_id))
            .collect()
    }

    fn send_to_zone(&mut self, zone_id: u32, update: Outgoing) {
        for id in self.zone_players(zone_id) {
            self.send_to_player(id, update.clone());
        }
    }

    pub fn set_zone_music(&mut self, zone_id: u32, music_id: u32) {
        self.zones.entry(zone_id).or_default().music_id = music_id;
        self.send_to_zone(zone_id, Outgoing::ZoneMusic { zone_id, music_id });
    }

    pub fn set_zone_weather(&mut self, zone_id: u32, weather: WeatherState, grade: f32) {
        self.zones.entry(zone_id).or_default().weather = Some((weather, grade));
        self.send_to_zone(zone_id, Outgoing::ZoneWeather { zone_id, weather, grade });
    }

    /// Override the light of a zone, a zero override light restores the area light.
    pub fn set_zone_override_light(&mut self, zone_id: u32, area_light: u32, override_light: u32, transition_ms: u32) {

        let info = self.zones.entry(zone_id).or_default();
        if override_light == 0 {
            info.light = None;
        } else {
            info.light = Some(ZoneLight { area_light, override_light, transition_ms });
        }

        self.send_to_zone(zone_id, Outgoing::OverrideLight { zone_id, area_light, override_light, transition_ms });

    }

    /// Send the dynamic information of a zone to a player entering it.
    pub fn send_zone_dynamic_info(&mut self, zone_id: u32, player: EntityId) {

        let Some(info) = self.zones.get(&zone_id).cloned() else {
            return;
        };

        if info.music_id != 0 {
            self.send_to_player(player, Outgoing::ZoneMusic { zone_id, music_id: info.music_id });
        }

        if let Some((weather, grade)) = info.weather {
            self.send_to_player(player, Outgoing::ZoneWeather { zone_id, weather, grade });
        }

        if let Some(light) = info.light {
            self.send_to_player(player, Outgoing::OverrideLight {
                zone_id,
                area_light: light.area_light,
                override_light: light.override_light,
                transition_ms: light.transition_ms,
            });
        }

    }

    /// Advance the weather of zones with players, at the weather update interval.
    #[instrument(skip_all)]
    pub(super) fn update_weather(&mut self, diff_ms: u32) {

        self.weather_timer.update(diff_ms);
        if !self.weather_timer.passed() {
            return;
        }

        self.weather_timer.reset();

        let mut zone_ids = self.players.iter()
            .filter_map(|id| self.entities.get(id))
            .filter_map(|entity| entity.as_player())
            .map(|player| player.zone_id)
            .collect::<Vec<_>>();

        zone_ids.sort_unstable();
        zone_ids.dedup();

        let interval = self.config.weather_update_interval;
        for zone_id in zone_ids {
            if let Some((weather, grade)) = self.ctx.rules.update_weather(self.key, zone_id, interval) {
                trace!("weather of zone {zone_id} changed to {weather:?} ({grade})");
                self.set_zone_weather(zone_id, weather, grade);
            }
        }

    }

}
