use serde::Deserialize;

use crate::error::EngineError;
use crate::model::GuardianContact;
use crate::phone;

/// Raw guardian contact fields as typed by staff.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactForm {
    pub guardian_name: String,
    pub phone: String,
    pub alternate_guardian_name: String,
    pub alternate_phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactUpdate {
    Set(GuardianContact),
    Clear,
}

fn non_blank(v: &str) -> Option<String> {
    let t = v.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn slot(name: &str, phone_raw: &str) -> Result<(Option<String>, Option<String>), EngineError> {
    let name = non_blank(name);
    let phone = match non_blank(phone_raw) {
        Some(raw) => Some(phone::canonicalize(&raw)?),
        None => None,
    };
    if phone.is_some() && name.is_none() {
        return Err(EngineError::MissingGuardianName);
    }
    Ok((name, phone))
}

impl ContactForm {
    /// Applies the dashboard rules. `existing` is what is on file now; an
    /// all-blank form clears it, or is rejected when there is nothing to clear.
    pub fn validate(&self, existing: &GuardianContact) -> Result<ContactUpdate, EngineError> {
        let all_blank = [
            &self.guardian_name,
            &self.phone,
            &self.alternate_guardian_name,
            &self.alternate_phone,
        ]
        .iter()
        .all(|v| v.trim().is_empty());
        if all_blank {
            if existing.phone.is_some() || existing.alternate_phone.is_some() {
                return Ok(ContactUpdate::Clear);
            }
            return Err(EngineError::NothingToUpdate);
        }

        let (guardian_name, phone) = slot(&self.guardian_name, &self.phone)?;
        let (alternate_guardian_name, alternate_phone) =
            slot(&self.alternate_guardian_name, &self.alternate_phone)?;
        Ok(ContactUpdate::Set(GuardianContact {
            guardian_name,
            phone,
            alternate_guardian_name,
            alternate_phone,
        }))
    }
}
