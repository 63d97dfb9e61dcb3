//! C4: a pure function, no side effects. Consumes a target set and an Inventory Snapshot and
//! emits a per-speaker Gameplan.
//!
//! The hardest invariant in the whole system is "one speaker per radio, one radio per speaker,
//! with minimum re-pair churn." Pre-emptively assigning controllers as targets are processed, in
//! a fixed order, prevents two targets from racing for the same controller and prefers reusing
//! existing (connected > paired > fresh) relationships to minimize the latency of the apply step.
//! This is deliberately a greedy, ordered assignment rather than a global optimization.

use crate::domain::{Gameplan, GameplanEntry, PlannedAction, Snapshot, Target};
use bluez_control::ControllerId;
use std::collections::HashSet;

pub fn plan(targets: &[Target], snapshot: &Snapshot) -> Gameplan {
    let pool = snapshot.controller_pool();
    let mut assigned: HashSet<ControllerId> = HashSet::new();
    let mut entries = Vec::with_capacity(targets.len());

    for target in targets {
        let connected_on: Vec<ControllerId> = pool
            .iter()
            .filter(|ctrl| snapshot.is_connected(ctrl, target.mac))
            .cloned()
            .collect();
        let paired_on: Vec<ControllerId> = pool
            .iter()
            .filter(|ctrl| snapshot.is_paired(ctrl, target.mac))
            .cloned()
            .collect();

        let free_connected = connected_on.iter().find(|ctrl| !assigned.contains(ctrl));
        let free_paired = paired_on.iter().find(|ctrl| !assigned.contains(ctrl));
        let any_free = pool.iter().find(|ctrl| !assigned.contains(ctrl));

        let (action, recommended) = if let Some(ctrl) = free_connected {
            (PlannedAction::NoAction, Some(ctrl.clone()))
        } else if let Some(ctrl) = free_paired {
            (PlannedAction::ConnectExistingPair, Some(ctrl.clone()))
        } else if let Some(ctrl) = any_free {
            (PlannedAction::PairAndConnect, Some(ctrl.clone()))
        } else {
            (PlannedAction::NoFreeController, None)
        };

        if let Some(ctrl) = &recommended {
            assigned.insert(ctrl.clone());
        }

        let disconnect: Vec<ControllerId> = connected_on
            .iter()
            .filter(|ctrl| Some(*ctrl) != recommended.as_ref())
            .cloned()
            .collect();

        entries.push(GameplanEntry {
            mac: target.mac,
            name: target.name.clone(),
            role: target.role,
            volume: target.volume,
            latency_ms: target.latency_ms,
            paired_on,
            connected_on,
            disconnect,
            action,
            recommended_controller: recommended,
        });
    }

    Gameplan { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{classify_role, AttachmentStatus, Controller, TargetRole};
    use bluez_control::{ControllerId, ControllerInfo};
    use std::collections::HashMap;

    fn controller(path: &str, mac: &str) -> Controller {
        let info = ControllerInfo {
            id: ControllerId::new(path),
            mac_address: mac.parse().unwrap(),
            friendly_name: path.to_string(),
        };
        Controller {
            role: classify_role(&info, "hci0"),
            info,
        }
    }

    fn snapshot_with(
        controllers: Vec<Controller>,
        attachments: Vec<((ControllerId, &str), AttachmentStatus)>,
    ) -> Snapshot {
        let mut map = HashMap::new();
        for ((ctrl, mac), status) in attachments {
            map.insert((ctrl, mac.parse().unwrap()), status);
        }
        Snapshot {
            controllers,
            attachments: map,
        }
    }

    fn target(mac: &str) -> Target {
        Target::new(mac.parse().unwrap(), mac)
    }

    #[test]
    fn two_speakers_two_free_radios_no_prior_state() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let r2 = controller("/org/bluez/hci2", "22:22:22:22:22:22");
        let snapshot = snapshot_with(vec![r1.clone(), r2.clone()], vec![]);

        let gameplan = plan(&[target("AA:AA:AA:AA:AA:AA"), target("BB:BB:BB:BB:BB:BB")], &snapshot);

        assert_eq!(gameplan.entries[0].action, PlannedAction::PairAndConnect);
        assert_eq!(gameplan.entries[0].recommended_controller, Some(r1.info.id.clone()));
        assert_eq!(gameplan.entries[1].action, PlannedAction::PairAndConnect);
        assert_eq!(gameplan.entries[1].recommended_controller, Some(r2.info.id.clone()));
    }

    #[test]
    fn speaker_already_connected_on_wrong_radio_is_no_action() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let r2 = controller("/org/bluez/hci2", "22:22:22:22:22:22");
        let mac = "AA:AA:AA:AA:AA:AA";
        let snapshot = snapshot_with(
            vec![r1.clone(), r2.clone()],
            vec![(
                (r2.info.id.clone(), mac),
                AttachmentStatus {
                    paired: true,
                    connected: true,
                    name: None,
                },
            )],
        );

        let gameplan = plan(&[target(mac)], &snapshot);

        assert_eq!(gameplan.entries[0].action, PlannedAction::NoAction);
        assert_eq!(gameplan.entries[0].recommended_controller, Some(r2.info.id));
        assert!(gameplan.entries[0].disconnect.is_empty());
    }

    #[test]
    fn stale_connection_elsewhere_is_disconnected() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let r2 = controller("/org/bluez/hci2", "22:22:22:22:22:22");
        let mac = "AA:AA:AA:AA:AA:AA";
        let snapshot = snapshot_with(
            vec![r1.clone(), r2.clone()],
            vec![
                (
                    (r1.info.id.clone(), mac),
                    AttachmentStatus {
                        paired: true,
                        connected: true,
                        name: None,
                    },
                ),
                (
                    (r2.info.id.clone(), mac),
                    AttachmentStatus {
                        paired: true,
                        connected: true,
                        name: None,
                    },
                ),
            ],
        );

        let gameplan = plan(&[target(mac)], &snapshot);

        assert_eq!(gameplan.entries[0].recommended_controller, Some(r1.info.id.clone()));
        assert_eq!(gameplan.entries[0].disconnect, vec![r2.info.id]);
    }

    #[test]
    fn not_enough_radios_yields_no_free_controller() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let r2 = controller("/org/bluez/hci2", "22:22:22:22:22:22");
        let snapshot = snapshot_with(vec![r1, r2], vec![]);

        let gameplan = plan(
            &[target("AA:AA:AA:AA:AA:AA"), target("BB:BB:BB:BB:BB:BB"), target("CC:CC:CC:CC:CC:CC")],
            &snapshot,
        );

        let no_controller = gameplan
            .entries
            .iter()
            .filter(|e| e.action == PlannedAction::NoFreeController)
            .count();
        assert_eq!(no_controller, 1);
        assert_eq!(
            gameplan
                .entries
                .iter()
                .filter(|e| e.action != PlannedAction::NoFreeController)
                .count(),
            2
        );
    }

    #[test]
    fn reserved_controller_is_never_recommended() {
        let r0 = controller("/org/bluez/hci0", "00:00:00:00:00:00");
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let snapshot = snapshot_with(vec![r0, r1.clone()], vec![]);

        let gameplan = plan(&[target("AA:AA:AA:AA:AA:AA")], &snapshot);

        assert_eq!(gameplan.entries[0].recommended_controller, Some(r1.info.id));
    }

    #[test]
    fn source_role_is_preserved_through_planning() {
        let r1 = controller("/org/bluez/hci1", "11:11:11:11:11:11");
        let snapshot = snapshot_with(vec![r1], vec![]);
        let mut t = target("AA:AA:AA:AA:AA:AA");
        t.role = TargetRole::Source;

        let gameplan = plan(&[t], &snapshot);
        assert_eq!(gameplan.entries[0].role, TargetRole::Source);
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use crate::domain::{classify_role, AttachmentStatus, Controller};
    use bluez_control::{ControllerId, ControllerInfo, MacAddress};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn arb_mac() -> impl Strategy<Value = MacAddress> {
        any::<[u8; 6]>().prop_map(|octets| {
            format!(
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                octets[0], octets[1], octets[2], octets[3], octets[4], octets[5]
            )
            .parse()
            .unwrap()
        })
    }

    /// Build an arbitrary world: up to 4 controllers (one reserved), up to 4 targets, each with
    /// an arbitrary set of prior paired/connected attachments restricted to the audio pool.
    fn arb_world() -> impl Strategy<Value = (Vec<Target>, Snapshot)> {
        (1..4usize, 1..4usize).prop_flat_map(|(n_controllers, n_targets)| {
            let controllers: Vec<Controller> = (0..n_controllers)
                .map(|i| {
                    let info = ControllerInfo {
                        id: ControllerId::new(&format!("/org/bluez/hci{i}")),
                        mac_address: format!("00:00:00:00:00:{i:02X}").parse().unwrap(),
                        friendly_name: format!("hci{i}"),
                    };
                    Controller {
                        role: classify_role(&info, "hci0"),
                        info,
                    }
                })
                .collect();
            let macs = proptest::collection::vec(arb_mac(), n_targets..=n_targets);
            let controllers2 = controllers.clone();
            macs.prop_flat_map(move |macs| {
                let controllers = controllers2.clone();
                let attachment_bits = proptest::collection::vec(
                    (0..2u8, any::<bool>(), any::<bool>()),
                    macs.len() * controllers.len(),
                );
                attachment_bits.prop_map(move |bits| {
                    let mut attachments = HashMap::new();
                    let mut idx = 0;
                    for mac in &macs {
                        for controller in &controllers {
                            let (_mode, paired, connected) = bits[idx];
                            idx += 1;
                            if paired || connected {
                                attachments.insert(
                                    (controller.info.id.clone(), *mac),
                                    AttachmentStatus {
                                        paired: paired || connected,
                                        connected,
                                        name: None,
                                    },
                                );
                            }
                        }
                    }
                    let targets: Vec<Target> = macs.iter().map(|m| Target::new(*m, "speaker")).collect();
                    let snapshot = Snapshot {
                        controllers: controllers.clone(),
                        attachments,
                    };
                    (targets, snapshot)
                })
            })
        })
    }

    proptest! {
        #[test]
        fn disjointness_and_never_reserved_and_break_before_make((targets, snapshot) in arb_world()) {
            let gameplan = plan(&targets, &snapshot);

            let mut seen = std::collections::HashSet::new();
            for entry in &gameplan.entries {
                if let Some(ctrl) = &entry.recommended_controller {
                    prop_assert!(seen.insert(ctrl.clone()), "controller assigned to two targets");
                    prop_assert!(
                        !snapshot
                            .controllers
                            .iter()
                            .any(|c| &c.info.id == ctrl && c.role == crate::domain::ControllerRole::ReservedBle),
                        "reserved controller was recommended"
                    );
                    prop_assert!(!entry.disconnect.contains(ctrl), "recommended controller also in disconnect list");
                }
            }
        }

        #[test]
        fn idempotence_on_unchanged_snapshot((targets, snapshot) in arb_world()) {
            let first = plan(&targets, &snapshot);
            let second = plan(&targets, &snapshot);
            prop_assert_eq!(first.entries.len(), second.entries.len());
            for (a, b) in first.entries.iter().zip(second.entries.iter()) {
                prop_assert_eq!(a.mac, b.mac);
                prop_assert_eq!(a.action, b.action);
                prop_assert_eq!(&a.recommended_controller, &b.recommended_controller);
            }
        }
    }
}
