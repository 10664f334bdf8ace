/*!
# Farmbook

Role-gated record keeping for a group of farms, served over HTTP.

## Overview

Agronomists plan weekly spray programs per greenhouse, supervisors and managers sign them off,
and scouts file pest and disease reports from the field. Everything lives in plain JSON files
under one data directory, so records can be inspected and backed up without a database.

## Architecture

### Frontend Layer
- Static HTML pages served by the backend, talking to the JSON API with `fetch`

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Role gate - session cookie lookup and per-route role allow-lists
  - Agronomy store - spray program rows with bulk replace and spreadsheet import
  - Farm report store - append-only inspection reports with search and charting
  - Exporters - CSV and XLSX downloads, PNG trend charts

### Data Persistence Layer
- One pretty-printed JSON array per record kind
- Whole-file rewrites through a temporary file and rename

## Roles

| Role       | Spray programs          | Farm reports  |
|------------|-------------------------|---------------|
| admin      | read, write, remarks    | read, file    |
| manager    | read, remarks           | read          |
| agronomist | read, write             | read, file    |
| supervisor | read, remarks           | read          |
| scout      | none                    | read, file    |

## Modules

- **config**: Settings from `FARMBOOK_*` environment variables
- **error**: Error type shared by every layer
- **saving**: JSON file persistence
- **login**: Users, payroll cross-check, sessions and the role gate
- **agronomy**: Spray program records
- **farm_report**: Inspection reports
- **loader**: Spreadsheet upload parsing (CSV, XLSX, XLS, ODS)
- **downloader**: CSV and XLSX export
- **graph**: Trend chart rendering
- **app**: Routing and handlers
*/

pub mod agronomy;
pub mod config;
pub mod downloader;
pub mod error;
pub mod farm_report;
pub mod loader;
pub mod login;
pub mod saving;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use agronomy::{AgronomyFilter, AgronomyPatch, AgronomyRow, AgronomyStore, ImportSummary};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use farm_report::{FarmReport, FarmReportFilter, FarmReportStore, NewFarmReport};
pub use login::{Identity, Role, SessionStore, UserStore};
