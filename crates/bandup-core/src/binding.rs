//! Slave-interface bindings created when a group registers and destroyed
//! when it leaves.

use std::path::Path;

use crate::collab::InterfaceBinder;
use crate::error::{BandupError, Result, Step, Teardown};
use crate::group::SlaveSpec;

/// Bind every auto-enslaved slave to `master`.
///
/// All-or-nothing: if slave *k* fails, bindings `0..k` are destroyed in
/// reverse order and the original error is returned.
pub fn bind_slaves(
    binder: &dyn InterfaceBinder,
    master: &str,
    slaves: &[SlaveSpec],
    membership_file: Option<&Path>,
) -> Result<()> {
    let mut bound: Vec<&SlaveSpec> = Vec::new();
    for slave in slaves.iter().filter(|s| s.auto_enslave) {
        match binder.create_binding(master, slave, membership_file) {
            Ok(()) => {
                tracing::debug!(master = %master, iface = %slave.name, "slave bound");
                bound.push(slave);
            }
            Err(source) => {
                tracing::warn!(
                    master = %master,
                    iface = %slave.name,
                    error = %source,
                    rollback = bound.len(),
                    "binding failed, unwinding"
                );
                let undo = unbind(binder, bound.into_iter().rev());
                if !undo.is_clean() {
                    tracing::warn!(
                        master = %master,
                        failures = undo.failures.len(),
                        "binding rollback incomplete"
                    );
                }
                return Err(BandupError::Binding {
                    iface: slave.name.clone(),
                    master: master.to_string(),
                    source,
                });
            }
        }
    }
    Ok(())
}

/// Destroy the bindings of every auto-enslaved slave, in registration order,
/// continuing past failures.
pub fn unbind_slaves(binder: &dyn InterfaceBinder, slaves: &[SlaveSpec]) -> Teardown {
    unbind(binder, slaves.iter().filter(|s| s.auto_enslave))
}

fn unbind<'a>(
    binder: &dyn InterfaceBinder,
    slaves: impl Iterator<Item = &'a SlaveSpec>,
) -> Teardown {
    let mut td = Teardown::new();
    for slave in slaves {
        td.attempt(Step::Unbind, &slave.name, || binder.destroy_binding(slave));
    }
    td
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedBinder {
        fail_create: Option<&'static str>,
        fail_destroy: Option<&'static str>,
        log: Mutex<Vec<String>>,
    }

    impl InterfaceBinder for ScriptedBinder {
        fn create_binding(
            &self,
            master: &str,
            slave: &SlaveSpec,
            _: Option<&Path>,
        ) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("create {}<-{}", master, slave.name));
            if self.fail_create == Some(slave.name.as_str()) {
                anyhow::bail!("no such device");
            }
            Ok(())
        }

        fn destroy_binding(&self, slave: &SlaveSpec) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("destroy {}", slave.name));
            if self.fail_destroy == Some(slave.name.as_str()) {
                anyhow::bail!("busy");
            }
            Ok(())
        }
    }

    fn slaves() -> Vec<SlaveSpec> {
        vec![
            SlaveSpec::new("wlan1"),
            SlaveSpec::new("wlan2").manual(),
            SlaveSpec::new("wlan3"),
            SlaveSpec::new("wlan4"),
        ]
    }

    #[test]
    fn binds_only_auto_enslaved() {
        let binder = ScriptedBinder::default();
        bind_slaves(&binder, "wlan0", &slaves(), None).unwrap();
        assert_eq!(
            *binder.log.lock().unwrap(),
            vec!["create wlan0<-wlan1", "create wlan0<-wlan3", "create wlan0<-wlan4"]
        );
    }

    #[test]
    fn failure_unwinds_in_reverse() {
        let binder = ScriptedBinder {
            fail_create: Some("wlan4"),
            ..Default::default()
        };
        let err = bind_slaves(&binder, "wlan0", &slaves(), None).unwrap_err();
        assert!(matches!(err, BandupError::Binding { ref iface, .. } if iface == "wlan4"));
        assert_eq!(
            *binder.log.lock().unwrap(),
            vec![
                "create wlan0<-wlan1",
                "create wlan0<-wlan3",
                "create wlan0<-wlan4",
                "destroy wlan3",
                "destroy wlan1",
            ]
        );
    }

    #[test]
    fn first_failure_needs_no_unwind() {
        let binder = ScriptedBinder {
            fail_create: Some("wlan1"),
            ..Default::default()
        };
        assert!(bind_slaves(&binder, "wlan0", &slaves(), None).is_err());
        assert_eq!(binder.log.lock().unwrap().len(), 1);
    }

    #[test]
    fn unbind_continues_past_failures() {
        let binder = ScriptedBinder {
            fail_destroy: Some("wlan1"),
            ..Default::default()
        };
        let td = unbind_slaves(&binder, &slaves());
        assert_eq!(td.failures.len(), 1);
        assert_eq!(td.failures[0].iface, "wlan1");
        assert_eq!(
            *binder.log.lock().unwrap(),
            vec!["destroy wlan1", "destroy wlan3", "destroy wlan4"]
        );
    }
}
