use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::process::ProcessOptions;
use crate::commands::records::FilesOptions;
use crate::commands::transition::CopyOptions;
use crate::commands::upload::{OrganizeOptions, UnitOptions, UploadOptions};
use crate::commands::{self, CommandReport};
use crate::pipeline::paths::Stage;
use crate::pipeline::store::{ProjectId, ProjectStatus, StructureDbId};

#[derive(Parser)]
#[command(name = "fieldstage")]
#[command(about = "Staged file lifecycle for field survey captures", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Print the report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct UnitArgs {
    /// Project number, e.g. P100
    #[arg(long = "project")]
    pub project_number: String,
    /// Collection date, e.g. 2024-01-01
    #[arg(long)]
    pub date: String,
    /// Crew initials
    #[arg(long = "crew")]
    pub crew_initials: String,
    /// Project location (site)
    #[arg(long)]
    pub location: String,
    /// Structure identifier within the site
    #[arg(long = "structure")]
    pub structure_id: String,
}

impl From<UnitArgs> for UnitOptions {
    fn from(args: UnitArgs) -> Self {
        Self {
            project_number: args.project_number,
            date: args.date,
            crew_initials: args.crew_initials,
            location: args.location,
            structure_id: args.structure_id,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Create every stage root and the metadata store
    Setup,

    /// Copy files into a new or existing intake folder and record them
    Upload {
        #[command(flatten)]
        unit: UnitArgs,
        /// Files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Move loose files from the intake root into a structure folder
    Organize {
        #[command(flatten)]
        unit: UnitArgs,
        /// File names in the intake root (default: every loose file)
        names: Vec<String>,
    },

    /// Insert or look up a project
    CreateProject {
        project_number: String,
        date: String,
        crew_initials: String,
    },

    /// Insert or look up a structure within a project
    CreateStructure {
        project_id: ProjectId,
        location: String,
        structure_id: String,
        date: String,
    },

    /// Record a file already under the storage root
    AddFile {
        structure_db_id: StructureDbId,
        filename: String,
        path: PathBuf,
    },

    /// List projects with their sites and structures
    Projects,

    /// List structures of a project
    Structures { project_id: ProjectId },

    /// List recorded files of a structure
    Files {
        structure_db_id: StructureDbId,
        /// Keep records whose path contains this date token
        #[arg(long)]
        date: Option<String>,
        /// Report where each file currently sits on disk
        #[arg(long)]
        locate: bool,
    },

    /// Set a project's status (active or archived)
    SetStatus {
        project_id: ProjectId,
        status: ProjectStatus,
    },

    /// Move every loose file in the intake root into the archive root
    ArchiveAll,

    /// Move a project folder from intake to archive
    Archive { project_folder: String },

    /// Move one file from intake to archive, keeping its relative path
    ArchiveFile { relative_path: String },

    /// Copy a project folder from archive to processing
    CopyToProcessing {
        project_folder: String,
        /// Run the processor on the new copy
        #[arg(long)]
        process: bool,
        /// Pass the settings template when processing
        #[arg(long, requires = "process")]
        template: bool,
    },

    /// Copy a project folder to processing and drop its video files
    StageVideo { project_folder: String },

    /// Move one file from processing to processed
    ProcessFile { relative_path: String },

    /// Run the external processor from processing into processed
    Process {
        project_folder: String,
        /// Pass the configured settings template
        #[arg(long)]
        template: bool,
        /// Pass this settings template instead
        #[arg(long, conflicts_with = "template")]
        template_file: Option<PathBuf>,
    },

    /// Show files on disk grouped by project and site
    Catalog {
        /// Stage key or directory name (default: every stage)
        stage: Option<Stage>,
    },

    /// Show the lifecycle state of a project folder
    State { project_folder: String },

    /// Show resolved paths, config and stage health
    Status,
}

fn dispatch(command: Command) -> Result<CommandReport> {
    match command {
        Command::Setup => commands::setup::run(),
        Command::Upload { unit, files } => commands::upload::run(&UploadOptions {
            unit: unit.into(),
            files,
        }),
        Command::Organize { unit, names } => commands::upload::run_organize(&OrganizeOptions {
            unit: unit.into(),
            names,
        }),
        Command::CreateProject {
            project_number,
            date,
            crew_initials,
        } => commands::records::create_project(&project_number, &date, &crew_initials),
        Command::CreateStructure {
            project_id,
            location,
            structure_id,
            date,
        } => commands::records::create_structure(project_id, &location, &structure_id, &date),
        Command::AddFile {
            structure_db_id,
            filename,
            path,
        } => commands::records::add_file(structure_db_id, &filename, &path),
        Command::Projects => commands::records::list_projects(),
        Command::Structures { project_id } => commands::records::list_structures(project_id),
        Command::Files {
            structure_db_id,
            date,
            locate,
        } => commands::records::list_files(&FilesOptions {
            structure_db_id,
            date,
            locate,
        }),
        Command::SetStatus { project_id, status } => {
            commands::records::set_status(project_id, status)
        }
        Command::ArchiveAll => commands::transition::archive_all(),
        Command::Archive { project_folder } => {
            commands::transition::archive_project(&project_folder)
        }
        Command::ArchiveFile { relative_path } => {
            commands::transition::archive_file(&relative_path)
        }
        Command::CopyToProcessing {
            project_folder,
            process,
            template,
        } => commands::transition::copy_to_processing(&CopyOptions {
            unit: project_folder,
            process,
            template,
        }),
        Command::StageVideo { project_folder } => {
            commands::transition::stage_video(&project_folder)
        }
        Command::ProcessFile { relative_path } => {
            commands::transition::process_file(&relative_path)
        }
        Command::Process {
            project_folder,
            template,
            template_file,
        } => commands::process::run(&ProcessOptions {
            unit: project_folder,
            template,
            template_file,
        }),
        Command::Catalog { stage } => commands::catalog::run(stage),
        Command::State { project_folder } => commands::state::run(&project_folder),
        Command::Status => commands::status::run(),
    }
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        out.push_str(&format!("  {line}\n"));
    }
    for line in &report.issues {
        out.push_str(&format!("  issue: {line}\n"));
    }
    out
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = dispatch(cli.command)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }

    if !report.ok {
        bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
