//! Extraction of registrant fields from a raw form-platform submission.
//!
//! The webhook payload is the form platform's question map (`q3_fullName3`,
//! `q34_pFull`, ...). Everything here is shape-tolerant: absent questions
//! become `None`/empty rather than parse failures, except the registrant's
//! name and the fee tier, without which nothing downstream can run.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Status answer that selects the permanent-resident fee tier.
pub const PR_STATUS_ANSWER: &str = "Pr [500]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Missing field '{0}' in submission")]
    MissingField(&'static str),
    #[error("No fee amount supplied for tier '{0}'")]
    MissingFeeTier(&'static str),
}

/// One processed registration submission. Field names on the wire are the
/// form platform's, kept stable for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    #[serde(rename = "Form_ID")]
    pub form_id: Option<String>,
    #[serde(rename = "Submission_ID")]
    pub submission_id: Option<String>,
    #[serde(rename = "Full_Name")]
    pub full_name: String,
    #[serde(rename = "Email")]
    pub email: Option<String>,
    #[serde(rename = "Phone_Number")]
    pub phone_number: Option<String>,
    #[serde(rename = "PR_Status")]
    pub pr_status: bool,
    #[serde(rename = "PR_Card_Number")]
    pub pr_card_number: Option<String>,
    #[serde(rename = "Amount_of_Payment")]
    pub amount_of_payment: String,
    #[serde(rename = "Payer_Full_Name")]
    pub payer_full_name: String,
    #[serde(rename = "PR_File_Upload_URLs")]
    pub pr_file_upload_urls: Vec<String>,
    #[serde(rename = "E_Transfer_File_Upload_URLs")]
    pub e_transfer_file_upload_urls: Vec<String>,
}

pub fn parse_submission(
    data: &Value,
    pr_amount: Option<&str>,
    normal_amount: Option<&str>,
) -> Result<Submission, SubmissionError> {
    let first = text(&data["q3_fullName3"]["first"])
        .ok_or(SubmissionError::MissingField("q3_fullName3.first"))?;
    let last = text(&data["q3_fullName3"]["last"])
        .ok_or(SubmissionError::MissingField("q3_fullName3.last"))?;
    let full_name = format!("{first} {last}");

    // The payer question only collects a first name; the surname is the
    // registrant's.
    let payer_full_name = match text(&data["q34_pFull"]["first"]) {
        Some(payer_first) => format!("{payer_first} {last}"),
        None => full_name.clone(),
    };

    let pr_status = text(&data["q36_typeOf"]).as_deref() == Some(PR_STATUS_ANSWER);
    let amount_of_payment = if pr_status {
        pr_amount.ok_or(SubmissionError::MissingFeeTier("pr_amount"))?
    } else {
        normal_amount.ok_or(SubmissionError::MissingFeeTier("normal_amount"))?
    }
    .to_string();

    let e_transfer_file_upload_urls = upload_urls(data, "eFile_upload");
    let submission_id = e_transfer_file_upload_urls
        .first()
        .and_then(|url| submission_id_from_url(url));

    Ok(Submission {
        form_id: text(&data["slug"]).and_then(|slug| form_id_from_slug(&slug)),
        submission_id,
        full_name,
        email: text(&data["q6_email6"]),
        phone_number: text(&data["q5_phoneNumber5"]["full"]),
        pr_status,
        pr_card_number: if pr_status { text(&data["q33_number"]) } else { None },
        amount_of_payment,
        payer_full_name,
        pr_file_upload_urls: upload_urls(data, "file_upload"),
        e_transfer_file_upload_urls,
    })
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn upload_urls(data: &Value, key: &str) -> Vec<String> {
    data[key]
        .as_array()
        .map(|urls| {
            urls.iter()
                .filter_map(|u| u.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// `"submit/243138058138255/"` → `"243138058138255"`.
fn form_id_from_slug(slug: &str) -> Option<String> {
    slug.trim_matches('/')
        .split('/')
        .nth(1)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Upload URLs look like `.../uploads/<user>/<form>/<submission>/<file>`.
fn submission_id_from_url(url: &str) -> Option<String> {
    let parts: Vec<&str> = url.split('/').collect();
    let uploads = parts.iter().position(|p| *p == "uploads")?;
    parts.get(uploads + 3).map(|s| s.to_string())
}
