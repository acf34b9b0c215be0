use crate::{
    api::models::users::{CurrentUser, Role},
    errors::Error,
    types::{Operation, Resource, UserId},
    AppState,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

pub mod resource {
    use crate::types::Resource;

    // Resource types
    #[derive(Default)]
    pub struct Users;

    #[derive(Default)]
    pub struct Courses;

    #[derive(Default)]
    pub struct Vouchers;

    #[derive(Default)]
    pub struct Transactions;

    #[derive(Default)]
    pub struct Enrollments;

    #[derive(Default)]
    pub struct Wallets;

    #[derive(Default)]
    pub struct PaymentMethods;

    #[derive(Default)]
    pub struct Withdrawals;

    // Convert type-level markers to enum values using Into
    impl From<Users> for Resource {
        fn from(_: Users) -> Resource {
            Resource::Users
        }
    }
    impl From<Courses> for Resource {
        fn from(_: Courses) -> Resource {
            Resource::Courses
        }
    }
    impl From<Vouchers> for Resource {
        fn from(_: Vouchers) -> Resource {
            Resource::Vouchers
        }
    }
    impl From<Transactions> for Resource {
        fn from(_: Transactions) -> Resource {
            Resource::Transactions
        }
    }
    impl From<Enrollments> for Resource {
        fn from(_: Enrollments) -> Resource {
            Resource::Enrollments
        }
    }
    impl From<Wallets> for Resource {
        fn from(_: Wallets) -> Resource {
            Resource::Wallets
        }
    }
    impl From<PaymentMethods> for Resource {
        fn from(_: PaymentMethods) -> Resource {
            Resource::PaymentMethods
        }
    }
    impl From<Withdrawals> for Resource {
        fn from(_: Withdrawals) -> Resource {
            Resource::Withdrawals
        }
    }
}

pub mod operation {
    use crate::types::Operation;

    // Operation types
    #[derive(Default)]
    pub struct CreateAll;

    #[derive(Default)]
    pub struct CreateOwn;

    #[derive(Default)]
    pub struct ReadAll;

    #[derive(Default)]
    pub struct ReadOwn;

    #[derive(Default)]
    pub struct UpdateAll;

    #[derive(Default)]
    pub struct UpdateOwn;

    #[derive(Default)]
    pub struct DeleteAll;

    #[derive(Default)]
    pub struct DeleteOwn;

    impl From<CreateAll> for Operation {
        fn from(_: CreateAll) -> Operation {
            Operation::CreateAll
        }
    }
    impl From<CreateOwn> for Operation {
        fn from(_: CreateOwn) -> Operation {
            Operation::CreateOwn
        }
    }
    impl From<ReadAll> for Operation {
        fn from(_: ReadAll) -> Operation {
            Operation::ReadAll
        }
    }
    impl From<ReadOwn> for Operation {
        fn from(_: ReadOwn) -> Operation {
            Operation::ReadOwn
        }
    }
    impl From<UpdateAll> for Operation {
        fn from(_: UpdateAll) -> Operation {
            Operation::UpdateAll
        }
    }
    impl From<UpdateOwn> for Operation {
        fn from(_: UpdateOwn) -> Operation {
            Operation::UpdateOwn
        }
    }
    impl From<DeleteAll> for Operation {
        fn from(_: DeleteAll) -> Operation {
            Operation::DeleteAll
        }
    }
    impl From<DeleteOwn> for Operation {
        fn from(_: DeleteOwn) -> Operation {
            Operation::DeleteOwn
        }
    }
}

/// Extractor that authenticates the caller and rejects the request with `403` before the
/// handler body runs unless the caller's role grants `O` on `R`.
pub struct RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    pub current_user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current_user = CurrentUser::from_request_parts(parts, state).await?;

        // Convert the types to enum values using Default + Into
        let resource = R::default().into();
        let operation = O::default().into();

        if has_permission(&current_user, resource, operation) {
            Ok(RequiresPermission {
                current_user,
                _marker: PhantomData,
            })
        } else {
            Err(Error::InsufficientPermissions {
                required: crate::types::Permission::Allow(resource, operation),
                action: operation,
                resource: format!("{resource:?}"),
            })
        }
    }
}

// Implement Deref so RequiresPermission<R, O> behaves like CurrentUser
impl<R, O> std::ops::Deref for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    type Target = CurrentUser;

    fn deref(&self) -> &Self::Target {
        &self.current_user
    }
}

/// Check if a user has permission to perform an operation on a resource
pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    // Admins have access to everything
    if user.is_admin() {
        return true;
    }

    role_has_permission(&user.role, resource, operation)
}

/// Check if a role grants permission for a resource/operation
pub fn role_has_permission(role: &Role, resource: Resource, operation: Operation) -> bool {
    match role {
        Role::Admin => true,
        Role::Instructor => {
            // Instructors sell courses and manage their own wallet; withdrawals are settled by admins
            matches!(
                (resource, operation),
                (Resource::Courses, Operation::CreateOwn)
                    | (Resource::Courses, Operation::UpdateOwn)
                    | (Resource::Courses, Operation::ReadOwn)
                    | (Resource::Courses, Operation::ReadAll)
                    | (Resource::Vouchers, Operation::CreateOwn)
                    | (Resource::Vouchers, Operation::ReadOwn)
                    | (Resource::Vouchers, Operation::DeleteOwn)
                    | (Resource::Wallets, Operation::CreateOwn)
                    | (Resource::Wallets, Operation::ReadOwn)
                    | (Resource::PaymentMethods, Operation::CreateOwn)
                    | (Resource::PaymentMethods, Operation::ReadOwn)
                    | (Resource::PaymentMethods, Operation::UpdateOwn)
                    | (Resource::PaymentMethods, Operation::DeleteOwn)
                    | (Resource::Withdrawals, Operation::CreateOwn)
                    | (Resource::Withdrawals, Operation::ReadOwn)
                    | (Resource::Users, Operation::ReadOwn)
            )
        }
        Role::User => {
            // Students browse and buy courses, then follow their own enrollments
            matches!(
                (resource, operation),
                (Resource::Courses, Operation::ReadAll)
                    | (Resource::Transactions, Operation::CreateOwn)
                    | (Resource::Transactions, Operation::ReadOwn)
                    | (Resource::Enrollments, Operation::ReadOwn)
                    | (Resource::Enrollments, Operation::UpdateOwn)
                    | (Resource::Users, Operation::ReadOwn)
            )
        }
    }
}

/// Generic helper to check if user can perform an operation on their own resources
/// (combines ID matching and Own permission check)
fn can_perform_own_operation(user: &CurrentUser, resource: Resource, operation: Operation, target_user_id: UserId) -> bool {
    // Must be the same user AND have the Own permission for the resource
    user.id == target_user_id && has_permission(user, resource, operation)
}

/// Generic helper to check if user can perform an operation on all resources (admin-level access)
fn can_perform_all_operation(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    has_permission(user, resource, operation)
}

// Macro to generate convenience functions for each operation type
macro_rules! generate_permission_helpers {
    ($operation_name:ident, $all_operation:expr, $own_operation:expr) => {
        paste::paste! {
            /// Check if user can [<$operation_name:lower>] their own resources (combines ID matching and [<$operation_name>]Own permission)
            pub fn [<can_ $operation_name:lower _own_resource>](user: &CurrentUser, resource: Resource, target_user_id: UserId) -> bool {
                can_perform_own_operation(user, resource, $own_operation, target_user_id)
            }

            /// Check if user can [<$operation_name:lower>] all resources of a type (admin-level access)
            pub fn [<can_ $operation_name:lower _all_resources>](user: &CurrentUser, resource: Resource) -> bool {
                can_perform_all_operation(user, resource, $all_operation)
            }
        }
    };
}

// i.e can_read_own_resource, can_read_all_resources, etc.
generate_permission_helpers!(read, Operation::ReadAll, Operation::ReadOwn);
generate_permission_helpers!(update, Operation::UpdateAll, Operation::UpdateOwn);
generate_permission_helpers!(delete, Operation::DeleteAll, Operation::DeleteOwn);

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_user_with_role(role: Role) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            full_name: "Test User".to_string(),
            role,
        }
    }

    #[test]
    fn test_admin_bypass() {
        let admin = create_user_with_role(Role::Admin);

        assert!(has_permission(&admin, Resource::Withdrawals, Operation::UpdateAll));
        assert!(has_permission(&admin, Resource::Users, Operation::CreateAll));
        assert!(has_permission(&admin, Resource::Vouchers, Operation::DeleteAll));
    }

    #[test]
    fn test_only_admins_settle_withdrawals() {
        for role in [Role::User, Role::Instructor] {
            let user = create_user_with_role(role);
            assert!(!has_permission(&user, Resource::Withdrawals, Operation::UpdateAll), "{role:?}");
            assert!(!has_permission(&user, Resource::Withdrawals, Operation::ReadAll), "{role:?}");
            assert!(!has_permission(&user, Resource::Wallets, Operation::ReadAll), "{role:?}");
        }
    }

    #[test]
    fn test_instructor_role() {
        let instructor = create_user_with_role(Role::Instructor);

        assert!(has_permission(&instructor, Resource::Wallets, Operation::CreateOwn));
        assert!(has_permission(&instructor, Resource::Withdrawals, Operation::CreateOwn));
        assert!(has_permission(&instructor, Resource::Courses, Operation::CreateOwn));

        // Instructors do not buy courses
        assert!(!has_permission(&instructor, Resource::Transactions, Operation::CreateOwn));
        assert!(!has_permission(&instructor, Resource::Vouchers, Operation::CreateAll));
    }

    #[test]
    fn test_user_role() {
        let user = create_user_with_role(Role::User);

        assert!(has_permission(&user, Resource::Transactions, Operation::CreateOwn));
        assert!(has_permission(&user, Resource::Enrollments, Operation::UpdateOwn));
        assert!(has_permission(&user, Resource::Courses, Operation::ReadAll));

        assert!(!has_permission(&user, Resource::Wallets, Operation::CreateOwn));
        assert!(!has_permission(&user, Resource::Courses, Operation::CreateOwn));
        assert!(!has_permission(&user, Resource::Transactions, Operation::ReadAll));
    }

    #[test]
    fn test_permission_helpers() {
        let user = create_user_with_role(Role::User);
        let other_id = Uuid::new_v4();

        assert!(can_read_own_resource(&user, Resource::Users, user.id));
        assert!(!can_read_own_resource(&user, Resource::Users, other_id));
        assert!(!can_read_all_resources(&user, Resource::Users));

        let instructor = create_user_with_role(Role::Instructor);
        assert!(can_update_own_resource(&instructor, Resource::Courses, instructor.id));
        assert!(!can_update_own_resource(&instructor, Resource::Courses, other_id));
        assert!(can_delete_own_resource(&instructor, Resource::Vouchers, instructor.id));
        assert!(!can_delete_all_resources(&instructor, Resource::Vouchers));

        let admin = create_user_with_role(Role::Admin);
        assert!(can_read_all_resources(&admin, Resource::Users));
        assert!(can_update_all_resources(&admin, Resource::Courses));
    }

    #[test]
    fn test_requires_permission_deref() {
        let user = create_user_with_role(Role::Instructor);
        let requires_permission = RequiresPermission::<resource::Wallets, operation::ReadOwn> {
            current_user: user.clone(),
            _marker: PhantomData,
        };

        assert_eq!(requires_permission.id, user.id);
        assert_eq!(requires_permission.email, user.email);
        assert!(!requires_permission.is_admin());
    }
}
