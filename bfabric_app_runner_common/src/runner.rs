//! Running every stage of an app for one workunit.

use crate::commands::CommandPort;
use crate::dispatch::{ChunksFile, WORKUNIT_DEFINITION_FILE_NAME};
use crate::entities::{Storage, Workunit, WorkunitStatus};
use crate::inputs::{prepare_folder, PrepareAction, Stager};
use crate::outputs::Registrar;
use crate::prelude::*;
use crate::process::ProcessRunner;
use crate::scp::ScpPort;
use crate::specs::app::{AppSpec, AppVersion};
use crate::workunit_definition::{WorkunitDefinition, WorkunitRef};

/// The endpoints whose entities are shared by all chunks of a run.
const RUN_CACHE_ENDPOINTS: &[&str] = &["resource", "dataset", "storage"];

/// How many entities a run keeps cached.
const RUN_CACHE_SIZE: usize = 10_000;

/// Runs the stages of one app version.
pub struct Runner<'a> {
    app: &'a AppVersion,
    lims: &'a Lims,
    commands: &'a dyn CommandPort,
    process_runner: &'a dyn ProcessRunner,
    scp: &'a dyn ScpPort,
    ssh_user: Option<&'a str>,
}

impl<'a> Runner<'a> {
    /// Create a runner. `commands` runs the app's commands, while
    /// `process_runner` and `scp` are used to move files.
    pub fn new(
        app: &'a AppVersion,
        lims: &'a Lims,
        commands: &'a dyn CommandPort,
        process_runner: &'a dyn ProcessRunner,
        scp: &'a dyn ScpPort,
        ssh_user: Option<&'a str>,
    ) -> Runner<'a> {
        Runner {
            app,
            lims,
            commands,
            process_runner,
            scp,
            ssh_user,
        }
    }

    /// Run the `dispatch` command, which creates the chunks of `work_dir`.
    pub fn run_dispatch(&self, workunit_ref: &WorkunitRef, work_dir: &Path) -> Result<()> {
        info!("dispatching {} into {}", workunit_ref, work_dir.display());
        self.commands
            .run(
                &self.app.commands.dispatch,
                &[workunit_ref.to_string(), work_dir.display().to_string()],
            )
            .context("dispatch failed")
    }

    /// Stage the inputs of a chunk.
    pub fn run_prepare_inputs(&self, chunk_dir: &Path) -> Result<()> {
        let stager = Stager::new(self.process_runner, self.scp, self.ssh_user);
        prepare_folder(
            self.lims,
            &stager,
            &chunk_dir.join("inputs.yml"),
            Some(chunk_dir),
            None,
            PrepareAction::Prepare,
        )
    }

    /// Run the `process` command on a chunk.
    pub fn run_process(&self, chunk_dir: &Path) -> Result<()> {
        info!("processing {}", chunk_dir.display());
        self.commands
            .run(&self.app.commands.process, &[chunk_dir.display().to_string()])
            .with_context(|| format!("processing {} failed", chunk_dir.display()))
    }

    /// Run the `collect` command on a chunk, if the app has one.
    pub fn run_collect(&self, workunit_ref: &WorkunitRef, chunk_dir: &Path) -> Result<()> {
        match &self.app.commands.collect {
            Some(collect) => {
                info!("collecting outputs of {}", chunk_dir.display());
                self.commands
                    .run(
                        collect,
                        &[workunit_ref.to_string(), chunk_dir.display().to_string()],
                    )
                    .with_context(|| format!("collecting {} failed", chunk_dir.display()))
            }
            None => {
                info!("app has no collect step");
                Ok(())
            }
        }
    }

    /// Register the outputs listed in a chunk's `outputs.yml`.
    pub fn register_outputs(
        &self,
        chunk_dir: &Path,
        definition: &WorkunitDefinition,
        force_storage: Option<&Storage>,
    ) -> Result<()> {
        let outputs_yaml = chunk_dir.join("outputs.yml");
        if !outputs_yaml.is_file() {
            return Err(RunnerError::chunk(format!(
                "chunk directory {} has no outputs.yml",
                chunk_dir.display()
            )));
        }
        let mut registrar = Registrar::new(self.lims, self.scp, self.ssh_user);
        if let Some(storage) = force_storage {
            registrar = registrar.with_forced_storage(storage.clone());
        }
        registrar.register_outputs(&outputs_yaml, definition, self.app.reuse_default_resource)
    }
}

/// Options for [`run_app`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Leave the LIMS alone: no status changes and no output registration.
    pub read_only: bool,
    /// Upload outputs to this storage instead of the workunit's.
    pub force_storage: Option<Storage>,
    /// Run the `dispatch` command. When false, the chunks must already
    /// exist.
    pub dispatch: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            read_only: false,
            force_storage: None,
            dispatch: true,
        }
    }
}

/// Run every stage of an app for a workunit.
///
/// The workunit is set to `processing` first and `available` once every
/// chunk is registered. On failure it is left at `processing`, and outputs
/// registered so far are kept.
#[instrument(level = "debug", skip_all, fields(work_dir = %work_dir.display()))]
pub fn run_app(
    runner: &Runner<'_>,
    workunit_ref: &WorkunitRef,
    work_dir: &Path,
    options: &RunOptions,
) -> Result<()> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("could not create {}", work_dir.display()))?;
    let work_dir = work_dir
        .canonicalize()
        .with_context(|| format!("could not resolve {}", work_dir.display()))?;
    let _cache = runner.lims.enable_cache(RUN_CACHE_ENDPOINTS, RUN_CACHE_SIZE);
    let definition_file = work_dir.join(WORKUNIT_DEFINITION_FILE_NAME);
    let definition = WorkunitDefinition::from_ref(workunit_ref, runner.lims, Some(&definition_file))?;
    let definition_ref = WorkunitRef::Path(definition_file);

    let workunit_id = if options.read_only {
        None
    } else {
        let id = definition.registration()?.workunit_id;
        Workunit::set_status(runner.lims.client(), id, WorkunitStatus::Processing)?;
        Some(id)
    };

    if options.dispatch {
        runner.run_dispatch(&definition_ref, &work_dir)?;
    }
    let chunks = ChunksFile::read_or_discover(&work_dir)?;
    for chunk_dir in chunks.chunk_dirs(&work_dir)? {
        info!("running chunk {}", chunk_dir.display());
        runner.run_prepare_inputs(&chunk_dir)?;
        runner.run_process(&chunk_dir)?;
        runner.run_collect(&definition_ref, &chunk_dir)?;
        if !options.read_only {
            runner.register_outputs(&chunk_dir, &definition, options.force_storage.as_ref())?;
        }
    }

    if let Some(id) = workunit_id {
        Workunit::set_status(runner.lims.client(), id, WorkunitStatus::Available)?;
    }
    Ok(())
}

/// Load the app version a workunit asks for from `app_spec`.
///
/// The workunit definition is cached in `work_dir`. Returns the app version
/// and a reference to the cached definition, which later stages can use
/// without asking the LIMS again. A reference which is already a path is
/// returned unchanged.
pub fn load_workunit_information(
    app_spec: &Path,
    lims: &Lims,
    work_dir: &Path,
    workunit_ref: &WorkunitRef,
) -> Result<(AppVersion, WorkunitRef)> {
    let definition_file = work_dir.join(WORKUNIT_DEFINITION_FILE_NAME);
    let definition = WorkunitDefinition::from_ref(workunit_ref, lims, Some(&definition_file))?;
    let registration = definition.registration()?;
    let spec = AppSpec::load(
        app_spec,
        registration.application_id,
        &registration.application_name,
    )?;
    let version = spec.resolve(&definition.execution.raw_parameters)?.clone();
    debug!("using app version {}", version.version);
    let workunit_ref = match workunit_ref {
        WorkunitRef::Id(_) => WorkunitRef::Path(definition_file),
        WorkunitRef::Path(path) => WorkunitRef::Path(path.clone()),
    };
    Ok((version, workunit_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::runner_error;
    use crate::specs::commands::Command;
    use crate::testing::{FakeLims, RecordingCommands, RecordingRunner, RecordingScp};
    use crate::workunit_definition::tests::example_lims;
    use assert_matches::assert_matches;
    use serde_json::json;

    const APP: &str = r#"
commands:
  dispatch: {type: shell, command: dispatch}
  process: {type: shell, command: process}
  collect: {type: shell, command: collect}
"#;

    struct Fixture {
        fake: FakeLims,
        lims: Lims,
        commands: RecordingCommands,
        process_runner: RecordingRunner,
        scp: RecordingScp,
        app: AppVersion,
        dir: tempfile::TempDir,
    }

    /// An app whose dispatch creates one empty chunk, and whose collect
    /// declares one output file.
    fn fixture(app: &str) -> Fixture {
        let fake = example_lims();
        let events = fake.events();
        let commands = RecordingCommands::new(events.clone());
        commands.on_run(Box::new(|command: &Command, args: &[String]| -> Result<()> {
            match command.argv_for_display()[0].as_str() {
                "dispatch" => {
                    let work_dir = Path::new(&args[1]);
                    fs::create_dir_all(work_dir.join("chunk_a"))?;
                    fs::write(work_dir.join("chunk_a/inputs.yml"), "inputs: []\n")?;
                    fs::write(work_dir.join("chunks.yml"), "chunks: [chunk_a]\n")?;
                }
                "collect" => {
                    let chunk_dir = Path::new(&args[1]);
                    fs::write(chunk_dir.join("result.bin"), "result")?;
                    fs::write(
                        chunk_dir.join("outputs.yml"),
                        "outputs:\n  - type: copy_resource\n    local_path: result.bin\n    store_entry_path: result.bin\n",
                    )?;
                }
                "collect_twice" => {
                    let chunk_dir = Path::new(&args[1]);
                    fs::write(chunk_dir.join("a.bin"), "a")?;
                    fs::write(chunk_dir.join("b.bin"), "b")?;
                    fs::write(
                        chunk_dir.join("outputs.yml"),
                        "outputs:\n  - type: copy_resource\n    local_path: a.bin\n    store_entry_path: a.bin\n  - type: copy_resource\n    local_path: b.bin\n    store_entry_path: b.bin\n",
                    )?;
                }
                "fail" => {
                    return Err(RunnerError::Command {
                        command: vec!["fail".to_owned()],
                        status: "exit status 1".to_owned(),
                    }
                    .into())
                }
                _ => {}
            }
            Ok(())
        }));
        Fixture {
            lims: fake.lims(),
            process_runner: RecordingRunner::new(events.clone()),
            scp: RecordingScp::new(events),
            fake,
            commands,
            app: serde_yaml::from_str(app).unwrap(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    impl Fixture {
        fn run(&self, options: &RunOptions) -> Result<()> {
            let runner = Runner::new(
                &self.app,
                &self.lims,
                &self.commands,
                &self.process_runner,
                &self.scp,
                None,
            );
            run_app(&runner, &WorkunitRef::Id(42), self.dir.path(), options)
        }

        fn workunit_statuses(&self) -> Vec<serde_json::Value> {
            self.fake
                .saved("workunit")
                .into_iter()
                .map(|record| record["status"].clone())
                .collect()
        }

        fn position(&self, prefix: &str) -> usize {
            let events = self.fake.events().borrow().clone();
            events
                .iter()
                .position(|e| e.starts_with(prefix))
                .unwrap_or_else(|| panic!("no event {:?} in {:?}", prefix, events))
        }
    }

    #[test]
    fn runs_every_stage_in_order() {
        let f = fixture(APP);
        f.run(&RunOptions::default()).unwrap();

        assert_eq!(f.workunit_statuses(), vec![json!("processing"), json!("available")]);
        let work_dir = f.dir.path().canonicalize().unwrap();
        let definition_file = work_dir.join(WORKUNIT_DEFINITION_FILE_NAME);
        let chunk_dir = work_dir.join("chunk_a");
        assert!(definition_file.is_file());
        assert_eq!(
            f.commands.calls(),
            vec![
                vec![
                    "dispatch".to_owned(),
                    definition_file.display().to_string(),
                    work_dir.display().to_string(),
                ],
                vec!["process".to_owned(), chunk_dir.display().to_string()],
                vec![
                    "collect".to_owned(),
                    definition_file.display().to_string(),
                    chunk_dir.display().to_string(),
                ],
            ]
        );

        let events = f.fake.events().borrow().clone();
        let status_saves = events
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == "lims.save workunit 42")
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        assert_eq!(status_saves.len(), 2);
        assert!(status_saves[0] < f.position("command dispatch"));
        assert!(f.position("command dispatch") < f.position("command process"));
        assert!(f.position("command process") < f.position("command collect"));
        assert!(f.position("command collect") < f.position("scp "));
        assert!(f.position("scp ") < f.position("lims.save resource 777"));
        assert!(f.position("lims.save resource 777") < status_saves[1]);
    }

    #[test]
    fn storage_is_read_once_per_run() {
        let f = fixture(&APP.replace("command: collect", "command: collect_twice"));
        f.run(&RunOptions::default()).unwrap();

        let events = f.fake.events().borrow().clone();
        let storage_reads = events.iter().filter(|e| *e == "lims.read storage").count();
        assert_eq!(storage_reads, 1);
        assert_eq!(events.iter().filter(|e| e.starts_with("scp ")).count(), 2);
    }

    #[test]
    fn read_only_runs_leave_the_lims_alone() {
        let f = fixture(APP);
        f.run(&RunOptions {
            read_only: true,
            ..RunOptions::default()
        })
        .unwrap();
        assert_eq!(f.commands.calls().len(), 3);
        assert!(f.fake.saved("workunit").is_empty());
        assert!(f.fake.saved("resource").is_empty());
        assert!(f.scp.calls().is_empty());
    }

    #[test]
    fn failures_leave_the_workunit_processing() {
        let f = fixture(&APP.replace("command: process", "command: fail"));
        let err = f.run(&RunOptions::default()).unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Command { .. }));
        assert_eq!(f.workunit_statuses(), vec![json!("processing")]);
        assert!(f.fake.saved("resource").is_empty());
        assert_eq!(f.commands.calls().len(), 2);
    }

    #[test]
    fn missing_collect_step_is_skipped() {
        let app = APP.replace("  collect: {type: shell, command: collect}\n", "");
        let f = fixture(&app);
        let err = f.run(&RunOptions::default()).unwrap_err();
        // Nothing wrote outputs.yml, so registration has nothing to read.
        assert_matches!(runner_error(&err), Some(RunnerError::Chunk(_)));
        assert_eq!(f.commands.calls().len(), 2);
        assert_eq!(f.workunit_statuses(), vec![json!("processing")]);
    }

    #[test]
    fn loads_the_requested_app_version() {
        let fake = example_lims();
        let lims = fake.lims();
        let dir = tempfile::tempdir().unwrap();
        let app_spec = dir.path().join("app.yml");
        fs::write(
            &app_spec,
            r#"
versions:
  - version: ["0.9.0", "1.0.0"]
    commands:
      dispatch: {type: exec, command: "/apps/{{app.name}}/{{app.version}}/dispatch"}
      process: {type: shell, command: process}
"#,
        )
        .unwrap();
        let work_dir = dir.path().join("work");
        let (version, workunit_ref) =
            load_workunit_information(&app_spec, &lims, &work_dir, &WorkunitRef::Id(42)).unwrap();
        assert_eq!(version.version, "1.0.0");
        assert_eq!(
            version.commands.dispatch.argv_for_display(),
            vec!["/apps/MyApp/1.0.0/dispatch"]
        );
        let definition_file = work_dir.join(WORKUNIT_DEFINITION_FILE_NAME);
        assert_eq!(workunit_ref, WorkunitRef::Path(definition_file.clone()));
        assert!(definition_file.is_file());
    }
}
