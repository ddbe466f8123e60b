use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{Employee, EmployeeId, HierarchyViolation, ManagerChange, OrganizationId};

/// Snapshot of one organization's reporting links, read inside the
/// transaction that will write the resulting plan.
#[derive(Debug, Clone)]
pub struct HierarchyIndex {
    organization_id: OrganizationId,
    managers: HashMap<EmployeeId, Option<EmployeeId>>,
    reports: HashMap<EmployeeId, Vec<EmployeeId>>,
}

impl HierarchyIndex {
    /// Employees of other organizations are ignored.
    pub fn new(organization_id: OrganizationId, employees: &[Employee]) -> Self {
        Self::from_links(
            organization_id,
            employees
                .iter()
                .filter(|employee| employee.organization_id == organization_id)
                .map(|employee| (employee.id, employee.manager_id)),
        )
    }

    pub fn from_links<I>(organization_id: OrganizationId, links: I) -> Self
    where
        I: IntoIterator<Item = (EmployeeId, Option<EmployeeId>)>,
    {
        let managers: HashMap<EmployeeId, Option<EmployeeId>> = links.into_iter().collect();
        let mut reports: HashMap<EmployeeId, Vec<EmployeeId>> =
            HashMap::with_capacity(managers.len());
        for (employee_id, manager_id) in &managers {
            if let Some(manager_id) = manager_id {
                reports.entry(*manager_id).or_default().push(*employee_id);
            }
        }
        for children in reports.values_mut() {
            children.sort();
        }

        Self {
            organization_id,
            managers,
            reports,
        }
    }

    pub const fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn contains(&self, employee_id: EmployeeId) -> bool {
        self.managers.contains_key(&employee_id)
    }

    /// `None` when the employee is unknown, `Some(None)` for a root.
    pub fn manager_of(&self, employee_id: EmployeeId) -> Option<Option<EmployeeId>> {
        self.managers.get(&employee_id).copied()
    }

    pub fn direct_reports(&self, employee_id: EmployeeId) -> &[EmployeeId] {
        self.reports
            .get(&employee_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<EmployeeId> {
        let mut roots = self
            .managers
            .iter()
            .filter_map(|(employee_id, manager_id)| manager_id.is_none().then_some(*employee_id))
            .collect::<Vec<_>>();
        roots.sort();
        roots
    }

    /// The single root, or `None` for an empty organization.
    pub fn root(&self) -> Result<Option<EmployeeId>> {
        let roots = self.roots();
        match roots.as_slice() {
            [] if self.is_empty() => Ok(None),
            [] => Err(LibError::from_violation(
                HierarchyViolation::MissingRoot {
                    organization_id: self.organization_id,
                },
                anyhow!(
                    "organization {} has {} employees and no root",
                    self.organization_id,
                    self.len()
                ),
            )),
            [root] => Ok(Some(*root)),
            _ => Err(LibError::integrity(
                HierarchyViolation::MultipleRoots {
                    root_ids: roots.clone(),
                },
                anyhow!(
                    "organization {} has {} roots",
                    self.organization_id,
                    roots.len()
                ),
            )),
        }
    }

    /// Like [`HierarchyIndex::root`], but an empty organization is also a
    /// missing root.
    pub fn require_root(&self) -> Result<EmployeeId> {
        self.root()?.ok_or_else(|| {
            LibError::from_violation(
                HierarchyViolation::MissingRoot {
                    organization_id: self.organization_id,
                },
                anyhow!("organization {} has no employees", self.organization_id),
            )
        })
    }

    /// Whether setting `node_id.manager_id = candidate_manager_id` would close
    /// a loop: true when the candidate is the node itself or the node is found
    /// on the candidate's reporting chain.
    pub fn would_create_cycle(
        &self,
        candidate_manager_id: EmployeeId,
        node_id: EmployeeId,
    ) -> bool {
        if candidate_manager_id == node_id {
            return true;
        }

        let mut visited = HashSet::with_capacity(self.managers.len().min(64));
        let mut current = candidate_manager_id;
        for _ in 0..=self.managers.len() {
            if !visited.insert(current) {
                return false;
            }
            match self.managers.get(&current).copied().flatten() {
                Some(manager_id) if manager_id == node_id => return true,
                Some(manager_id) => current = manager_id,
                None => return false,
            }
        }

        false
    }

    /// Managers from the direct manager up to the root. Stops early on a
    /// corrupted chain.
    pub fn ancestors(&self, employee_id: EmployeeId) -> Vec<EmployeeId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(employee_id);
        let mut current = employee_id;
        for _ in 0..self.managers.len() {
            match self.managers.get(&current).copied().flatten() {
                Some(manager_id) if self.contains(manager_id) && visited.insert(manager_id) => {
                    chain.push(manager_id);
                    current = manager_id;
                }
                _ => break,
            }
        }
        chain
    }

    /// Breadth-first order from `root` through direct reports.
    pub fn descendants_breadth_first(&self, root: EmployeeId) -> Vec<EmployeeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        if self.contains(root) {
            seen.insert(root);
            queue.push_back(root);
        }

        while let Some(employee_id) = queue.pop_front() {
            order.push(employee_id);
            for child in self.direct_reports(employee_id) {
                if seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }

        order
    }

    pub fn set_manager(&mut self, employee_id: EmployeeId, manager_id: Option<EmployeeId>) {
        let previous = self.managers.insert(employee_id, manager_id).flatten();
        if let Some(previous) = previous {
            if let Some(children) = self.reports.get_mut(&previous) {
                children.retain(|child| *child != employee_id);
            }
        }
        if let Some(manager_id) = manager_id {
            let children = self.reports.entry(manager_id).or_default();
            if let Err(pos) = children.binary_search(&employee_id) {
                children.insert(pos, employee_id);
            }
        }
    }

    pub fn apply(&mut self, changes: &[ManagerChange]) {
        for change in changes {
            self.set_manager(change.employee_id, change.manager_id);
        }
    }

    pub fn remove(&mut self, employee_id: EmployeeId) {
        if let Some(Some(manager_id)) = self.managers.remove(&employee_id) {
            if let Some(children) = self.reports.get_mut(&manager_id) {
                children.retain(|child| *child != employee_id);
            }
        }
        self.reports.remove(&employee_id);
    }

    pub fn violations(&self) -> Vec<HierarchyViolation> {
        let mut violations = Vec::new();

        let mut employee_ids = self.managers.keys().copied().collect::<Vec<_>>();
        employee_ids.sort();
        for employee_id in &employee_ids {
            match self.managers.get(employee_id).copied().flatten() {
                Some(manager_id) if manager_id == *employee_id => {
                    violations.push(HierarchyViolation::SelfReference {
                        employee_id: *employee_id,
                    });
                }
                Some(manager_id) if !self.contains(manager_id) => {
                    violations.push(HierarchyViolation::UnknownManagerReference {
                        employee_id: *employee_id,
                        manager_id,
                    });
                }
                _ => {}
            }
        }

        let roots = self.roots();
        match roots.len() {
            0 if !self.is_empty() => violations.push(HierarchyViolation::MissingRoot {
                organization_id: self.organization_id,
            }),
            0 | 1 => {}
            _ => violations.push(HierarchyViolation::MultipleRoots {
                root_ids: roots.clone(),
            }),
        }

        if let [root] = roots.as_slice() {
            let reachable: HashSet<EmployeeId> =
                self.descendants_breadth_first(*root).into_iter().collect();
            if reachable.len() != self.len() {
                let unreachable = employee_ids
                    .iter()
                    .filter(|employee_id| !reachable.contains(employee_id))
                    .copied()
                    .collect::<Vec<_>>();
                violations.push(HierarchyViolation::DisconnectedEmployees {
                    employee_ids: unreachable,
                });
            }
        }

        violations
    }
}

pub fn hierarchy_violations(
    organization_id: OrganizationId,
    employees: &[Employee],
) -> Vec<HierarchyViolation> {
    HierarchyIndex::new(organization_id, employees).violations()
}

/// Rejects a snapshot that breaks any invariant, reporting the first one.
pub fn ensure_hierarchy_invariants(index: &HierarchyIndex) -> Result<()> {
    let violations = index.violations();
    if let Some(first) = violations.first() {
        return Err(LibError::integrity(
            first.clone(),
            anyhow!(
                "hierarchy invariant validation failed for organization {}: {:?}",
                index.organization_id(),
                violations
            ),
        ));
    }

    Ok(())
}
