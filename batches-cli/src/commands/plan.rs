//! `batches plan`: dry-run of the reconciler's planning step.
//!
//! Reads a YAML snapshot of one changeset and the specs around it:
//!
//! ```yaml
//! changeset:
//!   publication_state: published
//!   external_state: open
//!   code_host: github
//!   owned: true
//! previous_spec: { ... }   # branch-push description
//! current_spec: { ... }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use tabled::{settings::Style, Table, Tabled};

use batches_core::{
    BranchPush, CampaignId, Changeset, CodeHostKind, ExternalState, PublicationState,
};
use batches_reconciler::{determine_plan_for, Plan};

/// Arguments for `batches plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// YAML document describing the changeset and its specs.
    pub file: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let doc: PlanDocument = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.file.display()))?;

        let changeset = doc.changeset.into_changeset();
        let plan = determine_plan_for(
            doc.previous_spec.as_ref(),
            doc.current_spec.as_ref(),
            &changeset,
        )
        .context("failed to determine plan")?;

        if self.json {
            let json = serde_json::to_string_pretty(&plan).context("failed to serialize plan")?;
            println!("{json}");
            return Ok(());
        }

        print_plan(&plan);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanDocument {
    changeset: ChangesetSnapshot,
    #[serde(default)]
    previous_spec: Option<BranchPush>,
    #[serde(default)]
    current_spec: Option<BranchPush>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangesetSnapshot {
    #[serde(default)]
    publication_state: PublicationState,
    #[serde(default)]
    external_state: Option<ExternalState>,
    #[serde(default)]
    code_host: CodeHostKind,
    #[serde(default)]
    closing: bool,
    #[serde(default)]
    unsynced: bool,
    /// Owned by a campaign, as opposed to merely tracked.
    #[serde(default)]
    owned: bool,
    /// Still referenced by the owning campaign.
    #[serde(default = "default_true")]
    attached: bool,
}

fn default_true() -> bool {
    true
}

impl ChangesetSnapshot {
    fn into_changeset(self) -> Changeset {
        let campaign = CampaignId(1);
        Changeset {
            code_host: self.code_host,
            publication_state: self.publication_state,
            external_state: self.external_state,
            closing: self.closing,
            unsynced: self.unsynced,
            owned_by_campaign_id: self.owned.then_some(campaign),
            campaign_ids: self.attached.then_some(campaign).into_iter().collect(),
            ..Changeset::default()
        }
    }
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "operation")]
    operation: String,
}

fn print_plan(plan: &Plan) {
    if plan.ops.is_empty() {
        println!("{}", "No operations: changeset is up to date".green());
    } else {
        let rows: Vec<OperationRow> = plan
            .ops
            .iter()
            .enumerate()
            .map(|(i, op)| OperationRow {
                step: i + 1,
                operation: op.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let changed = plan.delta.changed_fields();
    if !changed.is_empty() {
        println!("{} {}", "changed:".dimmed(), changed.join(", "));
    }
}
