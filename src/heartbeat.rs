//! Browser-side heartbeat state machine, modeled here so the transition
//! rules shipped in `script.rs` stay testable on the server. The served
//! JavaScript mirrors these transitions one for one.

/// Browser lifecycle events the machine reacts to. Visibility and focus are
/// collapsed onto the same transitions, matching the script's fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Initial page load.
    Load { visible: bool },
    /// Page Visibility API reported hidden.
    VisibilityHidden,
    /// Page Visibility API reported visible again.
    VisibilityVisible,
    /// Window focus fallback for browsers without the visibility API.
    FocusGained,
    FocusLost,
    /// A link was clicked. Only same-window navigations suppress the
    /// upcoming offline signal; the user is moving pages, not leaving.
    LinkClick { same_window: bool },
    /// The repeating heartbeat timer fired.
    TimerTick,
    /// Page teardown (pagehide / beforeunload).
    PageHide,
    /// Page restored from the back/forward cache or freshly shown, after the
    /// settle delay.
    PageShow { visible: bool },
}

/// Effects the embedding script must perform. `StartTimer` always replaces
/// any previous timer so at most one runs per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// POST to the heartbeat endpoint (keep-alive hint, async).
    SendHeartbeat,
    /// POST to the offline endpoint (beacon, survives teardown).
    SendOffline,
    StartTimer,
    StopTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Timer running, heartbeats flowing.
    Active,
    /// Timer stopped, offline already signaled (or page never visible).
    Hidden,
}

pub struct HeartbeatMachine {
    state: State,
    navigating: bool,
    timer_running: bool,
}

impl Default for HeartbeatMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMachine {
    pub fn new() -> Self {
        Self {
            state: State::Hidden,
            navigating: false,
            timer_running: false,
        }
    }

    /// Feed one event, returning the actions to perform in order.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Load { visible } | Event::PageShow { visible } => {
                // pageshow also ends any pending navigation suppression
                self.navigating = false;
                if visible {
                    self.activate()
                } else {
                    self.state = State::Hidden;
                    Vec::new()
                }
            }
            Event::VisibilityVisible | Event::FocusGained => {
                if self.state == State::Active {
                    // duplicate signal for a transition already handled
                    return Vec::new();
                }
                self.activate()
            }
            Event::VisibilityHidden | Event::FocusLost => {
                if self.state == State::Hidden {
                    return Vec::new();
                }
                self.deactivate()
            }
            Event::LinkClick { same_window } => {
                if same_window {
                    self.navigating = true;
                }
                Vec::new()
            }
            Event::TimerTick => {
                if self.state == State::Active && !self.navigating {
                    vec![Action::SendHeartbeat]
                } else {
                    Vec::new()
                }
            }
            Event::PageHide => self.deactivate(),
        }
    }

    fn activate(&mut self) -> Vec<Action> {
        self.state = State::Active;
        self.timer_running = true;
        vec![Action::SendHeartbeat, Action::StartTimer]
    }

    fn deactivate(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.timer_running {
            self.timer_running = false;
            actions.push(Action::StopTimer);
        }
        if !self.navigating {
            actions.push(Action::SendOffline);
        }
        self.state = State::Hidden;
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(machine: &mut HeartbeatMachine, events: &[Event]) -> Vec<Action> {
        events
            .iter()
            .flat_map(|&event| machine.handle(event))
            .collect()
    }

    #[test]
    fn load_tick_hide_produces_two_heartbeats_then_offline() {
        let mut machine = HeartbeatMachine::new();
        let actions = run(
            &mut machine,
            &[
                Event::Load { visible: true },
                Event::TimerTick,
                Event::VisibilityHidden,
            ],
        );
        assert_eq!(
            actions,
            vec![
                Action::SendHeartbeat,
                Action::StartTimer,
                Action::SendHeartbeat,
                Action::StopTimer,
                Action::SendOffline,
            ]
        );
    }

    #[test]
    fn same_window_link_click_suppresses_offline() {
        let mut machine = HeartbeatMachine::new();
        let actions = run(
            &mut machine,
            &[
                Event::Load { visible: true },
                Event::LinkClick { same_window: true },
                Event::PageHide,
            ],
        );
        assert!(!actions.contains(&Action::SendOffline));
        assert!(actions.contains(&Action::StopTimer));
    }

    #[test]
    fn new_tab_link_click_does_not_suppress_offline() {
        let mut machine = HeartbeatMachine::new();
        let actions = run(
            &mut machine,
            &[
                Event::Load { visible: true },
                Event::LinkClick { same_window: false },
                Event::PageHide,
            ],
        );
        assert!(actions.contains(&Action::SendOffline));
    }

    #[test]
    fn page_show_clears_navigation_and_resumes() {
        let mut machine = HeartbeatMachine::new();
        machine.handle(Event::Load { visible: true });
        machine.handle(Event::LinkClick { same_window: true });
        machine.handle(Event::PageHide);
        // restored from the back/forward cache
        let actions = machine.handle(Event::PageShow { visible: true });
        assert_eq!(actions, vec![Action::SendHeartbeat, Action::StartTimer]);
        // navigation flag is gone, so a later hide signals offline again
        let actions = machine.handle(Event::VisibilityHidden);
        assert!(actions.contains(&Action::SendOffline));
    }

    #[test]
    fn hidden_load_sends_nothing_until_visible() {
        let mut machine = HeartbeatMachine::new();
        assert!(machine.handle(Event::Load { visible: false }).is_empty());
        assert!(machine.handle(Event::TimerTick).is_empty());
        let actions = machine.handle(Event::VisibilityVisible);
        assert_eq!(actions, vec![Action::SendHeartbeat, Action::StartTimer]);
    }

    #[test]
    fn duplicate_visibility_transitions_do_not_double_send() {
        let mut machine = HeartbeatMachine::new();
        machine.handle(Event::Load { visible: true });
        // focus fallback fires after the visibility API already handled it
        assert!(machine.handle(Event::FocusGained).is_empty());
        let first = machine.handle(Event::VisibilityHidden);
        assert_eq!(first.iter().filter(|a| **a == Action::SendOffline).count(), 1);
        assert!(machine.handle(Event::FocusLost).is_empty());
    }

    #[test]
    fn at_most_one_timer_running() {
        let mut machine = HeartbeatMachine::new();
        let mut running = 0i32;
        let events = [
            Event::Load { visible: true },
            Event::VisibilityHidden,
            Event::VisibilityVisible,
            Event::PageShow { visible: true },
            Event::PageHide,
        ];
        for event in events {
            for action in machine.handle(event) {
                match action {
                    // StartTimer replaces any prior timer
                    Action::StartTimer => running = 1,
                    Action::StopTimer => running -= 1,
                    _ => {}
                }
                assert!((0..=1).contains(&running));
            }
        }
        assert_eq!(running, 0);
    }
}
