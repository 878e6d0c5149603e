use crate::models::Task;

/// Sort candidate tasks into scheduling order: execution_order ascending
/// with NULLs last, then priority ascending (1 = highest), then creation
/// time, then id as the stable final tiebreak.
pub fn order_candidates(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        order_rank(a.execution_order)
            .cmp(&order_rank(b.execution_order))
            .then(a.priority.cmp(&b.priority))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

fn order_rank(order: Option<i64>) -> (u8, i64) {
    match order {
        Some(value) => (0, value),
        None => (1, 0),
    }
}

/// Take the head group of an ordered candidate list: every task sharing the
/// first task's `execution_order`, enabling parallel work on one lane.
/// Tasks without an execution order do not group; the head alone is
/// returned.
pub fn head_group(ordered: Vec<Task>) -> Vec<Task> {
    let Some(head_order) = ordered.first().map(|t| t.execution_order) else {
        return vec![];
    };
    match head_order {
        Some(order) => ordered
            .into_iter()
            .take_while(|t| t.execution_order == Some(order))
            .collect(),
        None => ordered.into_iter().take(1).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerificationStatus;
    use chrono::{Duration, Utc};

    fn task(id: i64, order: Option<i64>, priority: i64) -> Task {
        let base = Utc::now();
        Task {
            id,
            key: format!("T-E01-F01-{id:03}"),
            feature_id: 1,
            title: format!("task {id}"),
            description: None,
            status: "todo".into(),
            priority,
            agent_type: None,
            assigned_agent: None,
            depends_on: vec![],
            execution_order: order,
            file_path: None,
            blocked_reason: None,
            started_at: None,
            completed_at: None,
            blocked_at: None,
            rejection_count: 0,
            context_data: None,
            completed_by: None,
            tests_passed: false,
            verification_status: VerificationStatus::Pending,
            files_changed: None,
            completion_notes: None,
            time_spent_minutes: None,
            created_at: base + Duration::seconds(id),
            updated_at: base + Duration::seconds(id),
        }
    }

    #[test]
    fn test_order_nulls_last() {
        let mut tasks = vec![task(1, None, 1), task(2, Some(2), 5), task(3, Some(1), 9)];
        order_candidates(&mut tasks);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_priority_breaks_ties_within_order() {
        let mut tasks = vec![task(1, Some(1), 5), task(2, Some(1), 3)];
        order_candidates(&mut tasks);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_head_group_shares_order() {
        let mut tasks = vec![
            task(1, Some(1), 5),
            task(2, Some(1), 3),
            task(3, Some(2), 1),
            task(4, None, 1),
        ];
        order_candidates(&mut tasks);
        let group = head_group(tasks);
        let ids: Vec<i64> = group.iter().map(|t| t.id).collect();
        // the whole order-1 lane, priority-sorted
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_head_group_null_order_is_single() {
        let mut tasks = vec![task(1, None, 1), task(2, None, 1)];
        order_candidates(&mut tasks);
        let group = head_group(tasks);
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].id, 1);
    }

    #[test]
    fn test_head_group_empty() {
        assert!(head_group(vec![]).is_empty());
    }
}
