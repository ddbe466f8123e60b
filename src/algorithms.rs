use std::collections::HashMap;

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::invariants::HierarchyIndex;
use crate::models::{Employee, EmployeeId, EmployeeWithReports, HierarchyViolation, ManagerChange};

fn unknown_employee(index: &HierarchyIndex, employee_id: EmployeeId) -> LibError {
    LibError::not_found(
        "Employee not found",
        anyhow!(
            "employee {} is not part of organization {}",
            employee_id,
            index.organization_id()
        ),
    )
}

/// Moves every direct report of `removed` to its manager, or to `root` when
/// `removed` has none. Must run before the record itself is deleted.
pub fn reparent_reports(
    removed: &Employee,
    reports: &[Employee],
    root: Option<EmployeeId>,
) -> Result<Vec<ManagerChange>> {
    let target = match removed.manager_id {
        Some(manager_id) => manager_id,
        None => match root {
            Some(root_id) if root_id != removed.id => root_id,
            _ => {
                return Err(LibError::from_violation(
                    HierarchyViolation::RootProtected {
                        root_id: removed.id,
                    },
                    anyhow!("no surviving root to receive reports of {}", removed.id),
                ));
            }
        },
    };

    Ok(reports
        .iter()
        .filter(|report| report.manager_id == Some(removed.id))
        .map(|report| ManagerChange::new(report.id, Some(target)))
        .collect())
}

/// Flatten, demote, promote. Empty when `candidate` already is the root.
pub fn plan_promotion(index: &HierarchyIndex, candidate: EmployeeId) -> Result<Vec<ManagerChange>> {
    if !index.contains(candidate) {
        return Err(unknown_employee(index, candidate));
    }

    let root = index.require_root()?;
    if root == candidate {
        return Ok(Vec::new());
    }

    // Holds for every non-root member of a well-formed tree, so flattening
    // below is unconditional.
    debug_assert!(index.would_create_cycle(candidate, root));

    let mut changes = index
        .direct_reports(root)
        .iter()
        .filter(|report| **report != candidate)
        .map(|report| ManagerChange::new(*report, Some(candidate)))
        .collect::<Vec<_>>();
    changes.push(ManagerChange::new(root, Some(candidate)));
    changes.push(ManagerChange::new(candidate, None));
    Ok(changes)
}

/// Validates the whole batch before producing any change.
pub fn plan_manager_assignment(
    index: &HierarchyIndex,
    manager: EmployeeId,
    subordinates: &[EmployeeId],
) -> Result<Vec<ManagerChange>> {
    let prior_manager = index
        .manager_of(manager)
        .ok_or_else(|| unknown_employee(index, manager))?;
    let root = index.require_root()?;
    if manager == root {
        return Err(LibError::from_violation(
            HierarchyViolation::RootProtected { root_id: root },
            anyhow!("cannot bulk assign reports to root {}", root),
        ));
    }

    // When the manager's own manager is being moved under it, the manager is
    // first re-pointed at the root; cycle checks run against that view.
    let breaks_loop = prior_manager.is_some_and(|prior| subordinates.contains(&prior));
    let mut view = index.clone();
    if breaks_loop {
        view.set_manager(manager, Some(root));
    }

    for subordinate in subordinates {
        if *subordinate == manager {
            return Err(LibError::from_violation(
                HierarchyViolation::SelfReference {
                    employee_id: manager,
                },
                anyhow!("employee {} listed as its own subordinate", manager),
            ));
        }
        if !index.contains(*subordinate) {
            return Err(unknown_employee(index, *subordinate));
        }
        if *subordinate == root {
            return Err(LibError::from_violation(
                HierarchyViolation::RootProtected { root_id: root },
                anyhow!("root {} cannot be reassigned under {}", root, manager),
            ));
        }
        if view.would_create_cycle(manager, *subordinate) {
            return Err(LibError::from_violation(
                HierarchyViolation::CycleDetected {
                    manager_id: manager,
                    employee_id: *subordinate,
                },
                anyhow!("{} already reports through {}", manager, subordinate),
            ));
        }
    }

    let mut changes = Vec::with_capacity(subordinates.len() + usize::from(breaks_loop));
    for subordinate in subordinates {
        if Some(*subordinate) == prior_manager {
            changes.push(ManagerChange::new(manager, Some(root)));
        }
        changes.push(ManagerChange::new(*subordinate, Some(manager)));
    }
    Ok(changes)
}

/// Single manager change requested through an employee update.
pub fn plan_manager_update(
    index: &HierarchyIndex,
    employee: EmployeeId,
    manager: EmployeeId,
) -> Result<Vec<ManagerChange>> {
    if employee == manager {
        return Err(LibError::from_violation(
            HierarchyViolation::SelfReference {
                employee_id: employee,
            },
            anyhow!("employee {} cannot manage itself", employee),
        ));
    }

    let current = index
        .manager_of(employee)
        .ok_or_else(|| unknown_employee(index, employee))?;
    if !index.contains(manager) {
        return Err(unknown_employee(index, manager));
    }

    match current {
        None => Err(LibError::from_violation(
            HierarchyViolation::RootProtected { root_id: employee },
            anyhow!("root {} manager change outside promotion", employee),
        )),
        Some(current) if current == manager => Ok(Vec::new()),
        Some(_) if index.would_create_cycle(manager, employee) => {
            Err(LibError::from_violation(
                HierarchyViolation::CycleDetected {
                    manager_id: manager,
                    employee_id: employee,
                },
                anyhow!("{} already reports through {}", manager, employee),
            ))
        }
        Some(_) => Ok(vec![ManagerChange::new(employee, Some(manager))]),
    }
}

/// Nested tree below `root`, built bottom-up without recursion.
pub fn build_tree(
    index: &HierarchyIndex,
    root: EmployeeId,
    employees: Vec<Employee>,
) -> Option<EmployeeWithReports> {
    let mut records: HashMap<EmployeeId, Employee> = employees
        .into_iter()
        .map(|employee| (employee.id, employee))
        .collect();
    let order = index.descendants_breadth_first(root);

    let mut built: HashMap<EmployeeId, EmployeeWithReports> = HashMap::with_capacity(order.len());
    for employee_id in order.iter().rev() {
        let Some(employee) = records.remove(employee_id) else {
            continue;
        };
        let mut direct_reports = index
            .direct_reports(*employee_id)
            .iter()
            .filter_map(|child| built.remove(child))
            .collect::<Vec<_>>();
        direct_reports.sort_by(|a, b| {
            a.employee
                .name
                .cmp(&b.employee.name)
                .then(a.employee.id.cmp(&b.employee.id))
        });
        built.insert(
            *employee_id,
            EmployeeWithReports {
                employee,
                direct_reports,
            },
        );
    }

    built.remove(&root)
}
