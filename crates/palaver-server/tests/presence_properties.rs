//! Property tests for presence tracking.
//!
//! Checked against a naive model: a user is online exactly while the model
//! set of their sessions is non-empty, and transitions fire only on the
//! empty/non-empty edges.

use std::collections::{HashMap, HashSet};

use palaver_server::{PresenceTracker, PresenceTransition};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Register { user: u64, session: u64 },
    Deregister { user: u64, session: u64 },
}

fn arbitrary_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        (0u64..4, 0u64..6, any::<bool>()).prop_map(|(user, session, register)| {
            if register {
                Op::Register { user, session }
            } else {
                Op::Deregister { user, session }
            }
        }),
        0..200,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn transitions_match_model(ops in arbitrary_ops()) {
        let mut tracker = PresenceTracker::new();
        let mut model: HashMap<u64, HashSet<u64>> = HashMap::new();
        let mut clock = 0u64;

        for op in ops {
            clock += 1;

            match op {
                Op::Register { user, session } => {
                    let sessions = model.entry(user).or_default();
                    let was_empty = sessions.is_empty();
                    sessions.insert(session);

                    let expected = was_empty.then_some(PresenceTransition::Online);
                    prop_assert_eq!(tracker.register(user, session), expected);
                },
                Op::Deregister { user, session } => {
                    let expected = match model.get_mut(&user) {
                        Some(sessions) => {
                            if sessions.remove(&session) && sessions.is_empty() {
                                Some(PresenceTransition::Offline { last_seen_secs: clock })
                            } else {
                                None
                            }
                        },
                        _ => None,
                    };
                    prop_assert_eq!(tracker.deregister(user, session, clock), expected);
                },
            }

            // Online exactly while the model set is non-empty
            for user in 0u64..4 {
                let online = model.get(&user).is_some_and(|s| !s.is_empty());
                prop_assert_eq!(tracker.is_online(user), online);
            }
        }
    }

    #[test]
    fn session_counts_match_model(ops in arbitrary_ops()) {
        let mut tracker = PresenceTracker::new();
        let mut model: HashMap<u64, HashSet<u64>> = HashMap::new();

        for op in ops {
            match op {
                Op::Register { user, session } => {
                    tracker.register(user, session);
                    model.entry(user).or_default().insert(session);
                },
                Op::Deregister { user, session } => {
                    tracker.deregister(user, session, 0);
                    if let Some(sessions) = model.get_mut(&user) {
                        sessions.remove(&session);
                    }
                },
            }
        }

        for user in 0u64..4 {
            let expected = model.get(&user).map_or(0, HashSet::len);
            prop_assert_eq!(tracker.session_count(user), expected);
        }

        let online: HashSet<u64> = tracker.online_users().collect();
        let expected: HashSet<u64> =
            model.iter().filter(|(_, s)| !s.is_empty()).map(|(u, _)| *u).collect();
        prop_assert_eq!(online, expected);
    }
}
