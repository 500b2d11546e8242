use crate::{domain::attendance::{AttendanceChange, AttendanceForUpdate, AttendanceOutcome, AttendanceRecord}, error::{Error, RsResult}, tools::{clock::{day_bounds_millis, now, parse_day, Clock, UtcDate}, log::{log_error, log_info, LogServiceType}}};

use super::ModelController;


impl ModelController {
	pub async fn log_attendance(&self, identity_id: &str) -> RsResult<AttendanceOutcome> {
		self.log_attendance_at(identity_id, now()).await
	}

	/// Records an attendance event at `at`, refused when the identity already has one in the last 5 minutes.
	pub async fn log_attendance_at(&self, identity_id: &str, at: UtcDate) -> RsResult<AttendanceOutcome> {
		let identity_id = identity_id.trim();
		if identity_id.is_empty() {
			return Err(Error::InvalidParams("identity_id is required".to_string()));
		}
		let accepted = self.store.add_attendance(identity_id, at).await.map_err(|error| {
			log_error(LogServiceType::Attendance, format!("Unable to log attendance of {}: {:?}", identity_id, error));
			error
		})?;
		if accepted {
			log_info(LogServiceType::Attendance, format!("Attendance of {} logged at {}", identity_id, at.print()));
			Ok(AttendanceOutcome::logged())
		} else {
			log_info(LogServiceType::Attendance, format!("Duplicate attendance of {} at {} ignored", identity_id, at.print()));
			Ok(AttendanceOutcome::duplicate())
		}
	}

	/// All records newest first, or those of one UTC day (`YYYY-MM-DD`).
	pub async fn list_attendance(&self, date: Option<&str>) -> RsResult<Vec<AttendanceRecord>> {
		let range = match date.map(str::trim).filter(|d| !d.is_empty()) {
			Some(day) => Some(day_bounds_millis(parse_day(day)?)?),
			None => None,
		};
		Ok(self.store.get_attendance(range).await?)
	}

	pub async fn update_attendance(&self, id: i64, update: AttendanceForUpdate) -> RsResult<AttendanceRecord> {
		self.update_attendance_at(id, update, now()).await
	}

	/// Corrects a record of the UTC day of `at`. A new timestamp must fall on that day too.
	pub async fn update_attendance_at(&self, id: i64, update: AttendanceForUpdate, at: UtcDate) -> RsResult<AttendanceRecord> {
		let identity_id = update.identity_id.trim();
		if identity_id.is_empty() {
			return Err(Error::InvalidParams("identity_id is required".to_string()));
		}
		let day = day_bounds_millis(at.date_naive())?;
		if let Some(timestamp) = update.timestamp {
			let millis = timestamp.timestamp_millis();
			if millis < day.0 || millis >= day.1 {
				return Err(Error::InvalidParams(format!("Timestamp {} is not today", timestamp.print())));
			}
		}

		let change = self.store.update_attendance(id, identity_id, update.timestamp, day).await?;
		check_change(id, change)?;
		log_info(LogServiceType::Attendance, format!("Attendance {} reassigned to {}", id, identity_id));
		self.store.get_attendance_record(id).await?.ok_or(Error::NotFound)
	}

	pub async fn delete_attendance(&self, id: i64) -> RsResult<()> {
		self.delete_attendance_at(id, now()).await
	}

	/// Deletes a record of the UTC day of `at`.
	pub async fn delete_attendance_at(&self, id: i64, at: UtcDate) -> RsResult<()> {
		let day = day_bounds_millis(at.date_naive())?;
		let change = self.store.delete_attendance(id, day).await?;
		check_change(id, change)?;
		log_info(LogServiceType::Attendance, format!("Attendance {} deleted", id));
		Ok(())
	}
}

fn check_change(id: i64, change: AttendanceChange) -> RsResult<()> {
	match change {
		AttendanceChange::Applied => Ok(()),
		AttendanceChange::Missing => Err(Error::NotFound),
		AttendanceChange::OutsideDay => Err(Error::InvalidParams(format!("Attendance {} is not from today and cannot be changed", id))),
	}
}
