//! The production [`AudioControl`] implementation: a connection to a PulseAudio-class server
//! using `libpulse-binding`'s standard (non-threaded) mainloop.
//!
//! The mainloop and context are `Rc`-based and so cannot cross threads; they are confined to one
//! dedicated worker thread for their whole lifetime, and every call is dispatched to that thread
//! as a boxed job over an `mpsc` channel, with the result returned through a `oneshot`. This
//! mirrors the command-channel shape `wayle-audio`'s backend drives its mainloop through, without
//! the event-subscription machinery this adapter has no use for.
use crate::{AudioControl, AudioError, ModuleId, ModuleInfo, SinkInfo, SinkState};
use async_trait::async_trait;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlags, State as ContextState};
use libpulse_binding::def::SinkState as PaSinkState;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::volume::{ChannelVolumes, Volume};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce(&mut Context, &mut Mainloop) + Send>;

/// A live connection to a PulseAudio-class server, backed by a dedicated worker thread.
pub struct PulseAudioControl {
    job_tx: std_mpsc::Sender<Job>,
}

impl PulseAudioControl {
    /// Spawn the worker thread, connect to the server under `app_name`, and block until the
    /// context is ready (or connecting fails).
    pub fn connect(app_name: &str) -> Result<Self, AudioError> {
        let (job_tx, job_rx) = std_mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let app_name = app_name.to_owned();

        std::thread::Builder::new()
            .name("pulse-audio-control".to_owned())
            .spawn(move || Self::worker_loop(&app_name, job_rx, ready_tx))
            .map_err(|err| AudioError::ConnectionFailed(format!("{err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(PulseAudioControl { job_tx }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AudioError::ConnectionFailed(
                "audio worker thread exited before connecting".to_owned(),
            )),
        }
    }

    fn worker_loop(
        app_name: &str,
        job_rx: std_mpsc::Receiver<Job>,
        ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
    ) {
        let (mut mainloop, mut context) = match Self::establish(app_name) {
            Ok(pair) => pair,
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));

        for job in job_rx.iter() {
            job(&mut context, &mut mainloop);
        }
    }

    fn establish(app_name: &str) -> Result<(Mainloop, Context), AudioError> {
        let mut mainloop = Mainloop::new()
            .ok_or_else(|| AudioError::ConnectionFailed("failed to create mainloop".to_owned()))?;
        let mut context = Context::new(&mainloop, app_name)
            .ok_or_else(|| AudioError::ConnectionFailed("failed to create context".to_owned()))?;

        context
            .connect(None, ContextFlags::NOFLAGS, None)
            .map_err(|err| AudioError::ConnectionFailed(format!("{err}")))?;

        loop {
            match mainloop.iterate(true) {
                IterateResult::Success(_) => match context.get_state() {
                    ContextState::Ready => return Ok((mainloop, context)),
                    ContextState::Failed | ContextState::Terminated => {
                        return Err(AudioError::ConnectionFailed(
                            "context entered a terminal state before becoming ready".to_owned(),
                        ));
                    }
                    _ => continue,
                },
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(AudioError::ConnectionFailed(
                        "mainloop iteration failed while connecting".to_owned(),
                    ));
                }
            }
        }
    }

    /// Dispatch `f` to the worker thread and await its result.
    async fn submit<T, F>(&self, f: F) -> Result<T, AudioError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Context, &mut Mainloop) -> Result<T, AudioError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |context, mainloop| {
            let _ = reply_tx.send(f(context, mainloop));
        });
        self.job_tx
            .send(job)
            .map_err(|_| AudioError::ConnectionFailed("audio worker thread is gone".to_owned()))?;
        reply_rx
            .await
            .map_err(|_| AudioError::ConnectionFailed("audio worker thread dropped the reply".to_owned()))?
    }
}

/// Runs `start` (which registers a libpulse callback writing into the returned cell), pumping
/// the mainloop until the callback fires or the mainloop itself errors out.
fn run_single<T, F>(mainloop: &mut Mainloop, start: F) -> Result<T, AudioError>
where
    F: FnOnce(Rc<RefCell<Option<T>>>),
{
    let result = Rc::new(RefCell::new(None));
    start(Rc::clone(&result));
    loop {
        match mainloop.iterate(true) {
            IterateResult::Success(_) => {
                if result.borrow().is_some() {
                    break;
                }
            }
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                return Err(AudioError::OperationFailed(
                    "mainloop iteration failed".to_owned(),
                ));
            }
        }
    }
    Rc::into_inner(result)
        .and_then(RefCell::into_inner)
        .ok_or(AudioError::NotReady)
}

/// As [`run_single`], but for list operations that invoke the callback once per item followed by
/// a terminating `ListResult::End`.
fn run_list<T, F>(mainloop: &mut Mainloop, start: F) -> Result<Vec<T>, AudioError>
where
    F: FnOnce(Rc<RefCell<Vec<T>>>, Rc<RefCell<bool>>),
{
    let items = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(RefCell::new(false));
    start(Rc::clone(&items), Rc::clone(&done));
    loop {
        match mainloop.iterate(true) {
            IterateResult::Success(_) => {
                if *done.borrow() {
                    break;
                }
            }
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                return Err(AudioError::OperationFailed(
                    "mainloop iteration failed".to_owned(),
                ));
            }
        }
    }
    Ok(Rc::into_inner(items)
        .map(RefCell::into_inner)
        .unwrap_or_default())
}

fn sink_state_from_pa(state: PaSinkState) -> SinkState {
    match state {
        PaSinkState::Running => SinkState::Running,
        PaSinkState::Idle => SinkState::Idle,
        PaSinkState::Suspended => SinkState::Suspended,
        PaSinkState::Invalid => SinkState::Unknown,
    }
}

fn volume_from_percent(percent: u8) -> ChannelVolumes {
    let scaled = (f64::from(percent) / 100.0) * f64::from(Volume::NORMAL.0);
    let mut volumes = ChannelVolumes::default();
    volumes.set(2, Volume(scaled as u32));
    volumes
}

#[async_trait]
impl AudioControl for PulseAudioControl {
    async fn load_null_sink(&self, name: &str) -> Result<ModuleId, AudioError> {
        let argument = format!("sink_name={name}");
        if let Some(existing) = self
            .list_modules()
            .await?
            .into_iter()
            .find(|m| m.name == "module-null-sink" && m.argument == argument)
        {
            return Ok(existing.id);
        }

        let index = self
            .submit(move |context, mainloop| {
                run_single(mainloop, |result| {
                    context
                        .introspect()
                        .load_module("module-null-sink", &argument, move |index| {
                            *result.borrow_mut() = Some(index);
                        });
                })
            })
            .await?;
        if index == libpulse_binding::def::INVALID_INDEX {
            return Err(AudioError::OperationFailed(
                "load_module module-null-sink returned an invalid index".to_owned(),
            ));
        }
        Ok(ModuleId(index))
    }

    async fn load_loopback(
        &self,
        source_monitor: &str,
        sink_name: &str,
        latency_ms: u32,
    ) -> Result<ModuleId, AudioError> {
        for attempt in 1..=crate::LOOPBACK_RETRY_ATTEMPTS {
            let argument =
                format!("source={source_monitor} sink={sink_name} latency_msec={latency_ms}");
            let index = self
                .submit(move |context, mainloop| {
                    run_single(mainloop, |result| {
                        context
                            .introspect()
                            .load_module("module-loopback", &argument, move |index| {
                                *result.borrow_mut() = Some(index);
                            });
                    })
                })
                .await?;
            if index != libpulse_binding::def::INVALID_INDEX {
                return Ok(ModuleId(index));
            }
            log::warn!("load_loopback attempt {attempt} returned an invalid module index");
            if attempt < crate::LOOPBACK_RETRY_ATTEMPTS {
                tokio::time::sleep(crate::LOOPBACK_RETRY_INTERVAL).await;
            }
        }
        Err(AudioError::LoopbackLoadFailed {
            attempts: crate::LOOPBACK_RETRY_ATTEMPTS,
        })
    }

    async fn unload_module(&self, module_id: ModuleId) -> Result<(), AudioError> {
        let ok = self
            .submit(move |context, mainloop| {
                run_single(mainloop, |result| {
                    context.introspect().unload_module(module_id.0, move |ok| {
                        *result.borrow_mut() = Some(ok);
                    });
                })
            })
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AudioError::NoSuchModule(module_id))
        }
    }

    async fn list_sinks(&self) -> Result<Vec<SinkInfo>, AudioError> {
        self.submit(|context, mainloop| {
            run_list(mainloop, |items, done| {
                context
                    .introspect()
                    .get_sink_info_list(move |result| match result {
                        ListResult::Item(info) => items.borrow_mut().push(SinkInfo {
                            name: info.name.as_deref().unwrap_or_default().to_owned(),
                            state: sink_state_from_pa(info.state),
                        }),
                        ListResult::End | ListResult::Error => *done.borrow_mut() = true,
                    });
            })
        })
        .await
    }

    async fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioError> {
        self.submit(|context, mainloop| {
            run_list(mainloop, |items, done| {
                context
                    .introspect()
                    .get_module_info_list(move |result| match result {
                        ListResult::Item(info) => items.borrow_mut().push(ModuleInfo {
                            id: ModuleId(info.index),
                            name: info.name.as_deref().unwrap_or_default().to_owned(),
                            argument: info.argument.as_deref().unwrap_or_default().to_owned(),
                        }),
                        ListResult::End | ListResult::Error => *done.borrow_mut() = true,
                    });
            })
        })
        .await
    }

    async fn unsuspend_sink(&self, name: &str) -> Result<(), AudioError> {
        let name = name.to_owned();
        let ok = self
            .submit(move |context, mainloop| {
                run_single(mainloop, |result| {
                    context.introspect().suspend_sink_by_name(
                        &name,
                        false,
                        Some(Box::new(move |ok| {
                            *result.borrow_mut() = Some(ok);
                        })),
                    );
                })
            })
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AudioError::OperationFailed("failed to unsuspend sink".to_owned()))
        }
    }

    async fn unload_all_matching(&self, name: &str) -> Result<usize, AudioError> {
        let matching: Vec<ModuleId> = self
            .list_modules()
            .await?
            .into_iter()
            .filter(|module| module.name == name)
            .map(|module| module.id)
            .collect();
        let count = matching.len();
        for module_id in matching {
            self.unload_module(module_id).await?;
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<bool, AudioError> {
        self.submit(|context, mainloop| {
            if context.get_state() != ContextState::Ready {
                return Ok(false);
            }
            run_single(mainloop, |result| {
                context.introspect().get_server_info(move |info| {
                    *result.borrow_mut() = Some(info.server_name.is_some());
                });
            })
        })
        .await
    }

    async fn set_sink_volume(&self, sink_name: &str, volume_percent: u8) -> Result<(), AudioError> {
        let name = sink_name.to_owned();
        let ok = self
            .submit(move |context, mainloop| {
                let volume = volume_from_percent(volume_percent);
                run_single(mainloop, |result| {
                    context.introspect().set_sink_volume_by_name(
                        &name,
                        &volume,
                        Some(Box::new(move |ok| {
                            *result.borrow_mut() = Some(ok);
                        })),
                    );
                })
            })
            .await?;
        if ok {
            Ok(())
        } else {
            Err(AudioError::OperationFailed("failed to set sink volume".to_owned()))
        }
    }
}
