//! Scripted events, closures run by the map once their delay expired.

use tracing::trace;

use super::Map;


/// A scripted event, given exclusive access to the map when run.
pub type ScriptEvent = Box<dyn FnOnce(&mut Map) + Send>;


impl Map {

    /// Schedule an event to run after the given delay in milliseconds. Events due at
    /// the same time run in scheduling order.
    pub fn schedule_script_event<F>(&mut self, delay_ms: u32, event: F)
    where
        F: FnOnce(&mut Map) + Send + 'static,
    {
        let seq = self.script_seq;
        self.script_seq += 1;
        self.script_events.insert((self.time_ms + delay_ms as u64, seq), Box::new(event));
    }

    #[inline]
    pub fn pending_script_events(&self) -> usize {
        self.script_events.len()
    }

    /// Run due events. Events scheduled by running events wait for the next tick.
    pub(super) fn process_script_events(&mut self) {

        let now = self.time_ms;
        let limit = self.script_seq;

        let mut count = 0;
        loop {

            let key = self.script_events.keys()
                .copied()
                .take_while(|&(due, _)| due <= now)
                .find(|&(_, seq)| seq < limit);

            let Some(key) = key else { break };
            let Some(event) = self.script_events.remove(&key) else { break };

            event(self);
            count += 1;

        }

        if count != 0 {
            trace!("ran {count} script events in map {}", self.key.map_id);
        }

    }

}
